//! Spatial-catalog batch builder
//!
//! Turns a list of JSON rows (a name, a position, and either a `radius` or an
//! `amaj`/`amin`/`phi` ellipse) into catalog entries with Gaussian sky maps,
//! then stores the catalog, its entries and their tiles in one transaction.

use std::collections::HashSet;

use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::{self, catalogs};
use crate::error::{GcnError, GcnResult};
use crate::localization::{from_cone, from_ellipse, is_close, Skymap};

const ELLIPSE_KEYS: [&str; 3] = ["amaj", "amin", "phi"];

/// Localization shape requested by a catalog row
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowShape {
    Cone { radius: f64 },
    Ellipse { amaj: f64, amin: f64, phi: f64 },
}

/// A catalog row with its sky map
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub entity_name: String,
    /// The row as submitted
    pub data: Value,
    pub skymap: Skymap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSummary {
    pub catalog_id: i64,
    pub entries: usize,
    pub tiles: usize,
}

/// Decide cone vs ellipse by which keys the row carries
pub fn row_shape(row: &Map<String, Value>) -> GcnResult<RowShape> {
    let has_radius = row.contains_key("radius");
    let ellipse_keys = ELLIPSE_KEYS.iter().filter(|k| row.contains_key(**k)).count();

    match (has_radius, ellipse_keys) {
        (true, 0) => Ok(RowShape::Cone {
            radius: number(row, "radius")?,
        }),
        (false, 3) => Ok(RowShape::Ellipse {
            amaj: number(row, "amaj")?,
            amin: number(row, "amin")?,
            phi: number(row, "phi")?,
        }),
        (true, _) => Err(GcnError::InvalidInput(
            "row has both radius and ellipse fields".to_string(),
        )),
        (false, 0) => Err(GcnError::InvalidInput(
            "row has neither radius nor amaj/amin/phi".to_string(),
        )),
        (false, _) => Err(GcnError::InvalidInput(
            "row has an incomplete amaj/amin/phi ellipse".to_string(),
        )),
    }
}

/// Build the entry for one row
pub fn build_entry(row: &Value) -> GcnResult<CatalogEntry> {
    let object = row
        .as_object()
        .ok_or_else(|| GcnError::InvalidInput("catalog row is not an object".to_string()))?;

    let entity_name = match object.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err(GcnError::InvalidInput("catalog row has no name".to_string())),
    };
    let ra = number(object, "ra")?;
    let dec = number(object, "dec")?;

    let skymap = match row_shape(object)? {
        RowShape::Cone { radius } => from_cone(ra, dec, radius)?,
        // Nearly circular ellipses are numerically unstable; use the cone
        RowShape::Ellipse { amaj, amin, .. } if is_close(amaj, amin) => from_cone(ra, dec, amaj)?,
        RowShape::Ellipse { amaj, amin, phi } => from_ellipse(ra, dec, amaj, amin, phi)?,
    };

    Ok(CatalogEntry {
        entity_name,
        data: row.clone(),
        skymap,
    })
}

/// Build every entry; any bad row or repeated name fails the whole batch
pub fn build_entries(rows: &[Value]) -> GcnResult<Vec<CatalogEntry>> {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut entries = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let entry = build_entry(row).map_err(|e| match e {
            GcnError::InvalidInput(msg) => GcnError::InvalidInput(format!("row {}: {}", index, msg)),
            other => other,
        })?;
        if !seen.insert(entry.entity_name.clone()) {
            return Err(GcnError::InvalidInput(format!(
                "row {}: duplicate name {}",
                index, entry.entity_name
            )));
        }
        entries.push(entry);
    }

    Ok(entries)
}

/// Build and store a catalog
pub async fn ingest_catalog(
    pool: &SqlitePool,
    catalog_name: &str,
    rows: Vec<Value>,
) -> GcnResult<CatalogSummary> {
    let entries = tokio::task::spawn_blocking(move || build_entries(&rows)).await??;

    let mut session = db::open_session(pool).await?;
    let (catalog_id, tiles) = catalogs::store_catalog(&mut session, catalog_name, &entries).await?;

    Ok(CatalogSummary {
        catalog_id,
        entries: entries.len(),
        tiles,
    })
}

/// Run [`ingest_catalog`] in the background; failures are logged only
pub fn spawn_catalog_ingest(pool: SqlitePool, catalog_name: String, rows: Vec<Value>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(catalog = %catalog_name, rows = rows.len(), "Building spatial catalog");
        match ingest_catalog(&pool, &catalog_name, rows).await {
            Ok(summary) => info!(
                catalog = %catalog_name,
                entries = summary.entries,
                tiles = summary.tiles,
                "Spatial catalog stored"
            ),
            Err(e) => error!(catalog = %catalog_name, error = %e, "Spatial catalog build failed"),
        }
    })
}

fn number(row: &Map<String, Value>, key: &str) -> GcnResult<f64> {
    row.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| GcnError::InvalidInput(format!("{} must be a number", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_row_shape_by_key_presence() {
        assert_eq!(
            row_shape(&object(json!({"radius": 1.0}))).unwrap(),
            RowShape::Cone { radius: 1.0 }
        );
        assert_eq!(
            row_shape(&object(json!({"amaj": 2.0, "amin": 1.0, "phi": 30.0}))).unwrap(),
            RowShape::Ellipse { amaj: 2.0, amin: 1.0, phi: 30.0 }
        );
    }

    #[test]
    fn test_ambiguous_rows_fail() {
        assert!(row_shape(&object(json!({"radius": 1.0, "amaj": 2.0}))).is_err());
        assert!(row_shape(&object(json!({"ra": 1.0}))).is_err());
        assert!(row_shape(&object(json!({"amaj": 2.0, "amin": 1.0}))).is_err());
        assert!(row_shape(&object(json!({"radius": "wide"}))).is_err());
    }

    #[test]
    fn test_degenerate_ellipse_uses_cone() {
        let entry = build_entry(&json!({
            "name": "NGC 4993", "ra": 197.45, "dec": -23.38,
            "amaj": 0.1, "amin": 0.1 + 1e-9, "phi": 45.0
        }))
        .unwrap();
        assert_eq!(entry.skymap.name, "197.45000_-23.38000_0.10000");
        assert_eq!(entry.entity_name, "NGC 4993");
    }

    #[test]
    fn test_ellipse_row() {
        let entry = build_entry(&json!({
            "name": "field", "ra": 10.0, "dec": 0.0, "amaj": 1.0, "amin": 0.5, "phi": 90.0
        }))
        .unwrap();
        assert_eq!(entry.skymap.name, "10.00000_0.00000_1.00000_0.50000_90.00000");
    }

    #[test]
    fn test_one_bad_row_fails_batch() {
        let rows = vec![
            json!({"name": "a", "ra": 1.0, "dec": 2.0, "radius": 1.0}),
            json!({"name": "b", "ra": 1.0, "dec": 2.0}),
        ];
        let err = build_entries(&rows).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_repeated_name_fails_batch() {
        let rows = vec![
            json!({"name": "field-1", "ra": 1.0, "dec": 2.0, "radius": 1.0}),
            json!({"name": "field-2", "ra": 3.0, "dec": 4.0, "radius": 1.0}),
            json!({"name": " field-1 ", "ra": 5.0, "dec": 6.0, "radius": 1.0}),
        ];
        let err = build_entries(&rows).unwrap_err();
        assert!(matches!(err, GcnError::InvalidInput(_)));
        assert!(err.to_string().contains("row 2: duplicate name field-1"));
    }
}
