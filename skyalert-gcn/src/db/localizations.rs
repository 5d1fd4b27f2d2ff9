//! Localizations (sky maps attached to events)

use chrono::NaiveDateTime;
use sqlx::types::Json;
use sqlx::{Row, SqliteConnection};

use super::{dateobs_key, parse_dateobs_key};
use crate::contour::FeatureCollection;
use crate::error::{GcnError, GcnResult};
use crate::localization::{MultiOrderMap, Skymap};

/// Stored localization
#[derive(Debug, Clone, PartialEq)]
pub struct Localization {
    pub id: i64,
    pub dateobs: NaiveDateTime,
    pub localization_name: String,
    pub map: MultiOrderMap,
    pub contour: Option<FeatureCollection>,
}

impl Localization {
    /// Dense probability image; see [`MultiOrderMap::flat_2d`]
    pub fn flat_2d(&self) -> Vec<f64> {
        self.map.flat_2d()
    }
}

/// Id of the localization stored under `(dateobs, name)`, if any
pub async fn find_localization_id(
    conn: &mut SqliteConnection,
    dateobs: &NaiveDateTime,
    name: &str,
) -> GcnResult<Option<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT id FROM localizations WHERE dateobs = ? AND localization_name = ?",
    )
    .bind(dateobs_key(dateobs))
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Store a sky map for an event unless that name is already stored
///
/// Returns the id of the (new or existing) row.
pub async fn merge_localization(
    conn: &mut SqliteConnection,
    dateobs: &NaiveDateTime,
    skymap: &Skymap,
) -> GcnResult<i64> {
    let map = &skymap.map;
    let inserted = sqlx::query(
        r#"
        INSERT INTO localizations
            (dateobs, localization_name, uniq, probdensity, distmu, distsigma, distnorm)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(dateobs, localization_name) DO NOTHING
        "#,
    )
    .bind(dateobs_key(dateobs))
    .bind(&skymap.name)
    .bind(Json(map.uniq()))
    .bind(Json(map.probdensity()))
    .bind(map.distmu().map(Json))
    .bind(map.distsigma().map(Json))
    .bind(map.distnorm().map(Json))
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted > 0 {
        tracing::info!(
            dateobs = %dateobs_key(dateobs),
            localization = %skymap.name,
            pixels = map.len(),
            "Stored localization"
        );
    }

    find_localization_id(conn, dateobs, &skymap.name)
        .await?
        .ok_or_else(|| {
            GcnError::Internal(format!("localization {} vanished after insert", skymap.name))
        })
}

pub async fn load_localization(conn: &mut SqliteConnection, id: i64) -> GcnResult<Option<Localization>> {
    let row = sqlx::query(
        r#"
        SELECT id, dateobs, localization_name, uniq, probdensity, distmu, distsigma, distnorm, contour
        FROM localizations
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| localization_from_row(&row)).transpose()
}

/// Localizations of an event, oldest first
pub async fn load_localizations_for_event(
    conn: &mut SqliteConnection,
    dateobs: &NaiveDateTime,
) -> GcnResult<Vec<Localization>> {
    let rows = sqlx::query(
        r#"
        SELECT id, dateobs, localization_name, uniq, probdensity, distmu, distsigma, distnorm, contour
        FROM localizations
        WHERE dateobs = ?
        ORDER BY id
        "#,
    )
    .bind(dateobs_key(dateobs))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(localization_from_row).collect()
}

/// Save the contour of a localization
pub async fn set_contour(
    conn: &mut SqliteConnection,
    id: i64,
    contour: &FeatureCollection,
) -> GcnResult<()> {
    sqlx::query("UPDATE localizations SET contour = ? WHERE id = ?")
        .bind(Json(contour))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn localization_from_row(row: &sqlx::sqlite::SqliteRow) -> GcnResult<Localization> {
    let dateobs: String = row.get("dateobs");
    let Json(uniq): Json<Vec<u64>> = row.try_get("uniq")?;
    let Json(probdensity): Json<Vec<f64>> = row.try_get("probdensity")?;
    let distmu: Option<Json<Vec<f64>>> = row.try_get("distmu")?;
    let distsigma: Option<Json<Vec<f64>>> = row.try_get("distsigma")?;
    let distnorm: Option<Json<Vec<f64>>> = row.try_get("distnorm")?;
    let contour: Option<Json<FeatureCollection>> = row.try_get("contour")?;

    let map = MultiOrderMap::new(uniq, probdensity)?.with_distance(
        distmu.map(|j| j.0),
        distsigma.map(|j| j.0),
        distnorm.map(|j| j.0),
    )?;

    Ok(Localization {
        id: row.get("id"),
        dateobs: parse_dateobs_key(&dateobs)?,
        localization_name: row.get("localization_name"),
        map,
        contour: contour.map(|j| j.0),
    })
}
