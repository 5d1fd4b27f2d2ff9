//! Events and their tags

use chrono::NaiveDateTime;
use sqlx::{Connection, Row, SqliteConnection};

use super::{dateobs_key, parse_dateobs_key};
use crate::error::{GcnError, GcnResult};

/// An alert event, identified by its truncated observation time
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub dateobs: NaiveDateTime,
    pub created_at: String,
}

/// Fetch the event for `dateobs`, creating it if absent
///
/// Concurrent callers racing on the same timestamp both succeed and see the
/// same row.
pub async fn get_or_create_event(
    conn: &mut SqliteConnection,
    dateobs: &NaiveDateTime,
) -> GcnResult<Event> {
    let key = dateobs_key(dateobs);

    let inserted = sqlx::query("INSERT INTO events (dateobs) VALUES (?) ON CONFLICT(dateobs) DO NOTHING")
        .bind(&key)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if inserted > 0 {
        tracing::debug!(dateobs = %key, "Created event");
    }

    load_event(conn, dateobs)
        .await?
        .ok_or_else(|| GcnError::Internal(format!("event {} vanished after insert", key)))
}

pub async fn load_event(
    conn: &mut SqliteConnection,
    dateobs: &NaiveDateTime,
) -> GcnResult<Option<Event>> {
    let row = sqlx::query("SELECT dateobs, created_at FROM events WHERE dateobs = ?")
        .bind(dateobs_key(dateobs))
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let dateobs: String = row.get("dateobs");
            Ok(Some(Event {
                dateobs: parse_dateobs_key(&dateobs)?,
                created_at: row.get("created_at"),
            }))
        }
        None => Ok(None),
    }
}

/// Number of stored events
pub async fn count_events(conn: &mut SqliteConnection) -> GcnResult<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&mut *conn)
        .await?)
}

/// Attach tags to an event; tags it already has are left alone
pub async fn merge_tags(
    conn: &mut SqliteConnection,
    dateobs: &NaiveDateTime,
    tags: &[String],
) -> GcnResult<()> {
    let key = dateobs_key(dateobs);
    let mut tx = conn.begin().await?;

    for tag in tags {
        sqlx::query(
            "INSERT INTO event_tags (dateobs, text) VALUES (?, ?) ON CONFLICT(dateobs, text) DO NOTHING",
        )
        .bind(&key)
        .bind(tag)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Tags of an event, oldest first
pub async fn load_tags(conn: &mut SqliteConnection, dateobs: &NaiveDateTime) -> GcnResult<Vec<String>> {
    let rows = sqlx::query("SELECT text FROM event_tags WHERE dateobs = ? ORDER BY id")
        .bind(dateobs_key(dateobs))
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().map(|row| row.get("text")).collect())
}
