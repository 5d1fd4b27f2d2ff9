//! Error types for skyalert-gcn

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result alias for the ingestion engine
pub type GcnResult<T> = Result<T, GcnError>;

/// Failures raised while ingesting notices or building localizations
#[derive(Debug, Error)]
pub enum GcnError {
    /// Payload is not a structurally valid VOEvent 2.0 document
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// A required element is absent from an otherwise valid document
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Could not establish a broker connection
    #[error("Broker connection failed: {0}")]
    BrokerConnect(String),

    /// Could not subscribe to, or read from, the configured topics
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// Database failure
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Skymap download or decoding failure
    #[error("Skymap fetch failed: {0}")]
    SkymapFetch(String),

    /// Caller supplied an unusable value (bad radius, ambiguous catalog row)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or unusable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background task panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),

    /// skyalert-common error
    #[error("Common error: {0}")]
    Common(#[from] skyalert_common::Error),
}

impl From<tokio::task::JoinError> for GcnError {
    fn from(err: tokio::task::JoinError) -> Self {
        GcnError::Internal(format!("background task failed: {}", err))
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. catalog name already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Engine error
    #[error(transparent)]
    Gcn(#[from] GcnError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Gcn(GcnError::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg)
            }
            ApiError::Gcn(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ENGINE_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
