//! Raw notices

use std::fmt;

use chrono::NaiveDateTime;
use sqlx::{Row, SqliteConnection};

use super::{dateobs_key, parse_dateobs_key};
use crate::error::{GcnError, GcnResult};

/// Whether a notice's sky map can be rendered now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkymapStatus {
    /// A published map was (or will be) downloaded
    Available,
    /// Only an analytic cone exists
    Deferred,
}

impl SkymapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkymapStatus::Available => "available",
            SkymapStatus::Deferred => "deferred",
        }
    }
}

impl fmt::Display for SkymapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notice to be stored
#[derive(Debug, Clone)]
pub struct NewNotice<'a> {
    pub ivorn: &'a str,
    pub dateobs: NaiveDateTime,
    pub notice_type: String,
    pub stream: &'a str,
    pub date: Option<&'a str>,
    pub content: &'a [u8],
}

/// Stored notice
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: i64,
    pub ivorn: String,
    pub dateobs: NaiveDateTime,
    pub notice_type: String,
    pub stream: String,
    pub date: Option<String>,
    pub content: Vec<u8>,
    pub skymap_status: Option<String>,
}

/// Store a notice unless one with the same ivorn exists; returns its id
pub async fn merge_notice(conn: &mut SqliteConnection, notice: &NewNotice<'_>) -> GcnResult<i64> {
    sqlx::query(
        r#"
        INSERT INTO notices (ivorn, dateobs, notice_type, stream, date, content)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(ivorn) DO NOTHING
        "#,
    )
    .bind(notice.ivorn)
    .bind(dateobs_key(&notice.dateobs))
    .bind(&notice.notice_type)
    .bind(notice.stream)
    .bind(notice.date)
    .bind(notice.content)
    .execute(&mut *conn)
    .await?;

    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM notices WHERE ivorn = ?")
        .bind(notice.ivorn)
        .fetch_optional(&mut *conn)
        .await?;

    id.ok_or_else(|| GcnError::Internal(format!("notice {} vanished after insert", notice.ivorn)))
}

/// Record the skymap status of a notice; false if no such notice
pub async fn set_skymap_status(
    conn: &mut SqliteConnection,
    ivorn: &str,
    status: SkymapStatus,
) -> GcnResult<bool> {
    let updated = sqlx::query("UPDATE notices SET skymap_status = ? WHERE ivorn = ?")
        .bind(status.as_str())
        .bind(ivorn)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(updated > 0)
}

pub async fn load_notice(conn: &mut SqliteConnection, ivorn: &str) -> GcnResult<Option<Notice>> {
    let row = sqlx::query(
        r#"
        SELECT id, ivorn, dateobs, notice_type, stream, date, content, skymap_status
        FROM notices
        WHERE ivorn = ?
        "#,
    )
    .bind(ivorn)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| notice_from_row(&row)).transpose()
}

/// Notices attached to an event, in arrival order
pub async fn load_notices_for_event(
    conn: &mut SqliteConnection,
    dateobs: &NaiveDateTime,
) -> GcnResult<Vec<Notice>> {
    let rows = sqlx::query(
        r#"
        SELECT id, ivorn, dateobs, notice_type, stream, date, content, skymap_status
        FROM notices
        WHERE dateobs = ?
        ORDER BY id
        "#,
    )
    .bind(dateobs_key(dateobs))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(notice_from_row).collect()
}

fn notice_from_row(row: &sqlx::sqlite::SqliteRow) -> GcnResult<Notice> {
    let dateobs: String = row.get("dateobs");
    Ok(Notice {
        id: row.get("id"),
        ivorn: row.get("ivorn"),
        dateobs: parse_dateobs_key(&dateobs)?,
        notice_type: row.get("notice_type"),
        stream: row.get("stream"),
        date: row.get("date"),
        content: row.get("content"),
        skymap_status: row.get("skymap_status"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::events::get_or_create_event;
    use skyalert_common::time::parse_dateobs;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_merge_notice_keeps_first_copy() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        skyalert_common::db::create_schema(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let dateobs = parse_dateobs("2019-04-25T08:18:05").unwrap();
        get_or_create_event(&mut conn, &dateobs).await.unwrap();

        let mut notice = NewNotice {
            ivorn: "ivo://gwnet/LVC#S190425z-1-Preliminary",
            dateobs,
            notice_type: "LVC_PRELIMINARY".to_string(),
            stream: "LVC",
            date: Some("2019-04-25T08:18:26"),
            content: b"<first/>",
        };
        let first = merge_notice(&mut conn, &notice).await.unwrap();
        notice.content = b"<second/>";
        let second = merge_notice(&mut conn, &notice).await.unwrap();
        assert_eq!(first, second);

        let stored = load_notice(&mut conn, notice.ivorn).await.unwrap().unwrap();
        assert_eq!(stored.content, b"<first/>");
        assert_eq!(stored.skymap_status, None);

        assert!(set_skymap_status(&mut conn, notice.ivorn, SkymapStatus::Available).await.unwrap());
        assert!(!set_skymap_status(&mut conn, "ivo://nope/x#y", SkymapStatus::Deferred).await.unwrap());
        let stored = load_notice(&mut conn, notice.ivorn).await.unwrap().unwrap();
        assert_eq!(stored.skymap_status.as_deref(), Some("available"));
    }
}
