//! Spatial catalogs, their entries and tiles

use sqlx::types::Json;
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};

use crate::catalog::CatalogEntry;
use crate::error::{GcnError, GcnResult};

/// Rows per multi-row tile INSERT (three bound values each)
const TILE_CHUNK: usize = 1000;

pub async fn catalog_exists(conn: &mut SqliteConnection, name: &str) -> GcnResult<bool> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM spatial_catalogs WHERE catalog_name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id.is_some())
}

/// Store a catalog with all its entries and tiles in one transaction
///
/// Fails without writing anything if the name is taken or any row is
/// rejected by the store. Returns the catalog id and the number of tiles.
pub async fn store_catalog(
    conn: &mut SqliteConnection,
    name: &str,
    entries: &[CatalogEntry],
) -> GcnResult<(i64, usize)> {
    let mut tx = conn.begin().await?;

    if catalog_exists(&mut tx, name).await? {
        return Err(GcnError::InvalidInput(format!("catalog {} already exists", name)));
    }

    let catalog_id = sqlx::query("INSERT INTO spatial_catalogs (catalog_name) VALUES (?)")
        .bind(name)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
    let entry_ids = insert_entries(&mut tx, catalog_id, entries).await?;
    let tiles = insert_tiles(&mut tx, &entry_ids, entries).await?;

    tx.commit().await?;
    Ok((catalog_id, tiles))
}

/// Returns entry ids in input order
async fn insert_entries(
    conn: &mut SqliteConnection,
    catalog_id: i64,
    entries: &[CatalogEntry],
) -> GcnResult<Vec<i64>> {
    let mut ids = Vec::with_capacity(entries.len());

    for entry in entries {
        let id = sqlx::query(
            r#"
            INSERT INTO spatial_catalog_entries
                (catalog_id, entity_name, data, localization_name, uniq, probdensity)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(catalog_id)
        .bind(&entry.entity_name)
        .bind(Json(&entry.data))
        .bind(&entry.skymap.name)
        .bind(Json(entry.skymap.map.uniq()))
        .bind(Json(entry.skymap.map.probdensity()))
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
        ids.push(id);
    }

    Ok(ids)
}

/// Insert the flat tile list of each entry; `entry_ids` is co-indexed with `entries`
async fn insert_tiles(
    conn: &mut SqliteConnection,
    entry_ids: &[i64],
    entries: &[CatalogEntry],
) -> GcnResult<usize> {
    let tiles: Vec<(i64, i64, f64)> = entry_ids
        .iter()
        .zip(entries)
        .flat_map(|(id, entry)| {
            entry
                .skymap
                .map
                .uniq()
                .iter()
                .zip(entry.skymap.map.probdensity())
                .map(move |(uniq, density)| (*id, *uniq as i64, *density))
        })
        .collect();

    for chunk in tiles.chunks(TILE_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO spatial_catalog_entry_tiles (entry_id, healpix, probdensity) ");
        builder.push_values(chunk, |mut row, (entry_id, healpix, density)| {
            row.push_bind(*entry_id).push_bind(*healpix).push_bind(*density);
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok(tiles.len())
}

pub async fn count_entries(conn: &mut SqliteConnection, catalog_name: &str) -> GcnResult<i64> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM spatial_catalog_entries e
        JOIN spatial_catalogs c ON c.id = e.catalog_id
        WHERE c.catalog_name = ?
        "#,
    )
    .bind(catalog_name)
    .fetch_one(&mut *conn)
    .await?)
}

pub async fn count_tiles(conn: &mut SqliteConnection, catalog_name: &str) -> GcnResult<i64> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM spatial_catalog_entry_tiles t
        JOIN spatial_catalog_entries e ON e.id = t.entry_id
        JOIN spatial_catalogs c ON c.id = e.catalog_id
        WHERE c.catalog_name = ?
        "#,
    )
    .bind(catalog_name)
    .fetch_one(&mut *conn)
    .await?)
}
