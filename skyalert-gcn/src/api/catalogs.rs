//! Spatial catalog API
//!
//! POST /api/spatial_catalogs, GET /api/spatial_catalogs/:name

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::spawn_catalog_ingest;
use crate::db::{self, catalogs};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/spatial_catalogs request
#[derive(Debug, Deserialize)]
pub struct CreateCatalogRequest {
    pub catalog_name: String,
    pub rows: Vec<Value>,
}

/// POST /api/spatial_catalogs response
#[derive(Debug, Serialize)]
pub struct CreateCatalogResponse {
    pub catalog_name: String,
    pub rows: usize,
}

/// GET /api/spatial_catalogs/:name response
#[derive(Debug, Serialize)]
pub struct CatalogStatusResponse {
    pub catalog_name: String,
    pub entries: i64,
    pub tiles: i64,
}

/// POST /api/spatial_catalogs
///
/// Accepts the batch and builds it in the background. Rows are only checked
/// by the builder, so a malformed row shows up in the log, not the response.
pub async fn create_catalog(
    State(state): State<AppState>,
    Json(request): Json<CreateCatalogRequest>,
) -> ApiResult<(StatusCode, Json<CreateCatalogResponse>)> {
    let catalog_name = request.catalog_name.trim().to_string();
    if catalog_name.is_empty() {
        return Err(ApiError::BadRequest("catalog_name is empty".to_string()));
    }

    let mut session = db::open_session(&state.db).await?;
    if catalogs::catalog_exists(&mut session, &catalog_name).await? {
        return Err(ApiError::Conflict(format!(
            "Spatial catalog already exists: {}",
            catalog_name
        )));
    }
    drop(session);

    let rows = request.rows.len();
    spawn_catalog_ingest(state.db.clone(), catalog_name.clone(), request.rows);

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateCatalogResponse { catalog_name, rows }),
    ))
}

/// GET /api/spatial_catalogs/:name
pub async fn get_catalog(
    State(state): State<AppState>,
    Path(catalog_name): Path<String>,
) -> ApiResult<Json<CatalogStatusResponse>> {
    let mut session = db::open_session(&state.db).await?;
    if !catalogs::catalog_exists(&mut session, &catalog_name).await? {
        return Err(ApiError::NotFound(format!(
            "Spatial catalog not found: {}",
            catalog_name
        )));
    }

    let entries = catalogs::count_entries(&mut session, &catalog_name).await?;
    let tiles = catalogs::count_tiles(&mut session, &catalog_name).await?;

    Ok(Json(CatalogStatusResponse {
        catalog_name,
        entries,
        tiles,
    }))
}

/// Build spatial catalog routes
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/spatial_catalogs", post(create_catalog))
        .route("/api/spatial_catalogs/:name", get(get_catalog))
}
