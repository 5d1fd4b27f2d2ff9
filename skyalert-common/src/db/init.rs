//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to date.
//! Every `create_*` function is idempotent (`CREATE TABLE IF NOT EXISTS`).

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Per-connection settings, applied to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL lets the HTTP surface read while the consumer writes
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table used by skyalert
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_events_table(pool).await?;
    create_event_tags_table(pool).await?;
    create_notices_table(pool).await?;
    create_localizations_table(pool).await?;
    create_spatial_catalogs_table(pool).await?;
    create_spatial_catalog_entries_table(pool).await?;
    create_spatial_catalog_entry_tiles_table(pool).await?;
    Ok(())
}

/// One row per event, keyed by truncated observation time
pub async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            dateobs TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_event_tags_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dateobs TEXT NOT NULL REFERENCES events(dateobs) ON DELETE CASCADE,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(dateobs, text)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_notices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ivorn TEXT NOT NULL UNIQUE,
            dateobs TEXT NOT NULL REFERENCES events(dateobs) ON DELETE CASCADE,
            notice_type TEXT NOT NULL,
            stream TEXT NOT NULL,
            date TEXT,
            content BLOB NOT NULL,
            skymap_status TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_notices_dateobs ON notices(dateobs)")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn create_localizations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS localizations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dateobs TEXT NOT NULL REFERENCES events(dateobs) ON DELETE CASCADE,
            localization_name TEXT NOT NULL,
            uniq TEXT NOT NULL,
            probdensity TEXT NOT NULL,
            distmu TEXT,
            distsigma TEXT,
            distnorm TEXT,
            contour TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(dateobs, localization_name)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_spatial_catalogs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spatial_catalogs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            catalog_name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_spatial_catalog_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spatial_catalog_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            catalog_id INTEGER NOT NULL REFERENCES spatial_catalogs(id) ON DELETE CASCADE,
            entity_name TEXT NOT NULL,
            data TEXT NOT NULL,
            localization_name TEXT NOT NULL,
            uniq TEXT NOT NULL,
            probdensity TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(catalog_id, entity_name)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_spatial_catalog_entry_tiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spatial_catalog_entry_tiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id INTEGER NOT NULL REFERENCES spatial_catalog_entries(id) ON DELETE CASCADE,
            healpix INTEGER NOT NULL,
            probdensity REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tiles_entry ON spatial_catalog_entry_tiles(entry_id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
