//! Database access for skyalert-gcn
//!
//! Every function takes a single connection. The ingest pipeline acquires one
//! pooled connection per message (its session) and runs each step on it;
//! statements outside an explicit transaction commit immediately.

pub mod catalogs;
pub mod events;
pub mod localizations;
pub mod notices;

use chrono::NaiveDateTime;
use skyalert_common::time::{format_dateobs, DATEOBS_FORMAT};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};

use crate::error::{GcnError, GcnResult};

/// One pooled connection, released when dropped
pub type Session = PoolConnection<Sqlite>;

/// Acquire a session for one unit of work
pub async fn open_session(pool: &SqlitePool) -> GcnResult<Session> {
    Ok(pool.acquire().await?)
}

pub(crate) fn dateobs_key(dateobs: &NaiveDateTime) -> String {
    format_dateobs(dateobs)
}

pub(crate) fn parse_dateobs_key(text: &str) -> GcnResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, DATEOBS_FORMAT)
        .map_err(|e| GcnError::Internal(format!("stored dateobs {} unreadable: {}", text, e)))
}
