//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::consumer::{ConsumerState, ConsumerStatus};
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the consumer is disabled
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub consumer: ConsumerStatus,
}

/// GET /health
///
/// Also the default target of the consumer's own health probe, so it answers
/// 200 whenever the HTTP surface and database are reachable.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let consumer = state.consumer_status.read().await.clone();
    let status = if consumer.state == ConsumerState::Disabled {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "skyalert-gcn".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        consumer,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
