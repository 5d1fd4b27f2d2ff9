//! skyalert-gcn library interface
//!
//! Alert ingestion and sky-localization engine: VOEvent validation, parsing
//! and tagging, skymap resolution, HEALPix localizations, credible-region
//! contours, the polling consumer and the spatial-catalog batch builder.

pub mod api;
pub mod catalog;
pub mod consumer;
pub mod contour;
pub mod db;
pub mod error;
pub mod healpix;
pub mod ingest;
pub mod localization;
pub mod resolver;
pub mod voevent;

pub use crate::error::{ApiError, ApiResult, GcnError, GcnResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::consumer::SharedConsumerStatus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Live view of the alert consumer
    pub consumer_status: SharedConsumerStatus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, consumer_status: SharedConsumerStatus) -> Self {
        Self {
            db,
            consumer_status,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::catalog_routes())
        .with_state(state)
}
