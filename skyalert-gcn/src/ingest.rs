//! Notice ingestion pipeline
//!
//! One payload runs through validation, parsing, tagging and skymap
//! resolution (all synchronous), then through the store in a fixed order:
//! event, tags, notice, localization, contour. Each step commits before
//! the next begins, so a failure leaves the earlier rows in place.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use skyalert_common::time::format_dateobs;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::consumer::NoticeHandler;
use crate::contour::compute_contour;
use crate::db::notices::{NewNotice, SkymapStatus};
use crate::db::{self, events, localizations, notices};
use crate::error::{GcnError, GcnResult};
use crate::localization::{from_cone, name_from_url, Skymap, SkymapFetcher};
use crate::resolver::{resolve, Resolution, Unavailable};
use crate::voevent::{classify, parse, validate, NoticeType, ParsedNotice};

/// What happened to a notice's localization
#[derive(Debug, Clone, PartialEq)]
pub enum LocalizationOutcome {
    Stored { id: i64, name: String },
    Unavailable(Unavailable),
}

/// Summary of one ingested notice
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub dateobs: NaiveDateTime,
    pub ivorn: String,
    pub notice_type: NoticeType,
    pub tags: Vec<String>,
    pub localization: LocalizationOutcome,
}

/// Everything derived from the payload before touching the database
struct Prepared {
    notice: ParsedNotice,
    tags: Vec<String>,
    resolution: Resolution,
}

fn prepare(payload: &[u8]) -> GcnResult<Prepared> {
    let event = validate(payload)?;
    let notice = parse(&event)?;
    let tags = classify(&event, &notice.stream, notice.notice_type);
    let resolution = resolve(&event, &notice);
    Ok(Prepared {
        notice,
        tags,
        resolution,
    })
}

/// Stores notices and their localizations
pub struct Ingestor {
    pool: SqlitePool,
    fetcher: Arc<dyn SkymapFetcher>,
}

impl Ingestor {
    pub fn new(pool: SqlitePool, fetcher: Arc<dyn SkymapFetcher>) -> Self {
        Self { pool, fetcher }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run the full pipeline for one payload
    pub async fn ingest(&self, payload: &[u8]) -> GcnResult<IngestReport> {
        let Prepared {
            notice,
            tags,
            resolution,
        } = prepare(payload)?;
        let dateobs = notice.dateobs;

        let mut session = db::open_session(&self.pool).await?;

        events::get_or_create_event(&mut session, &dateobs).await?;
        events::merge_tags(&mut session, &dateobs, &tags).await?;
        notices::merge_notice(
            &mut session,
            &NewNotice {
                ivorn: &notice.ivorn,
                dateobs,
                notice_type: notice.notice_type.name(),
                stream: &notice.stream,
                date: notice.date.as_deref(),
                content: payload,
            },
        )
        .await?;

        let localization = match resolution {
            Resolution::Unavailable(reason) => {
                info!(ivorn = %notice.ivorn, reason = %reason, "No skymap for notice");
                LocalizationOutcome::Unavailable(reason)
            }
            Resolution::Download { url } => {
                let name = name_from_url(&url)?;
                let id = match localizations::find_localization_id(&mut session, &dateobs, &name).await? {
                    Some(id) => {
                        debug!(localization = %name, "Skymap already stored; skipping download");
                        id
                    }
                    None => {
                        let map = self.fetcher.fetch(&url).await?;
                        localizations::merge_localization(&mut session, &dateobs, &Skymap { name: name.clone(), map })
                            .await?
                    }
                };
                LocalizationOutcome::Stored { id, name }
            }
            Resolution::Cone { ra, dec, error } => {
                let skymap = tokio::task::spawn_blocking(move || from_cone(ra, dec, error)).await??;
                let id = localizations::merge_localization(&mut session, &dateobs, &skymap).await?;
                LocalizationOutcome::Stored {
                    id,
                    name: skymap.name,
                }
            }
        };

        if let LocalizationOutcome::Stored { id, .. } = &localization {
            ensure_contour(&mut session, *id).await?;
        }

        info!(
            ivorn = %notice.ivorn,
            dateobs = %format_dateobs(&dateobs),
            notice_type = %notice.notice_type,
            tags = ?tags,
            "Ingested notice"
        );

        Ok(IngestReport {
            dateobs,
            ivorn: notice.ivorn,
            notice_type: notice.notice_type,
            tags,
            localization,
        })
    }

    /// Record whether the notice's skymap is available or only a cone
    ///
    /// Re-resolves the payload independently of [`Ingestor::ingest`]. Returns
    /// the status written, or `None` when the notice has no skymap.
    pub async fn record_skymap_status(&self, payload: &[u8]) -> GcnResult<Option<SkymapStatus>> {
        let Prepared {
            notice, resolution, ..
        } = prepare(payload)?;

        let status = match resolution {
            Resolution::Download { .. } => SkymapStatus::Available,
            Resolution::Cone { .. } => SkymapStatus::Deferred,
            Resolution::Unavailable(_) => return Ok(None),
        };

        let mut session = db::open_session(&self.pool).await?;
        if !notices::set_skymap_status(&mut session, &notice.ivorn, status).await? {
            return Err(GcnError::Internal(format!("notice {} not stored", notice.ivorn)));
        }
        debug!(ivorn = %notice.ivorn, status = %status, "Recorded skymap status");
        Ok(Some(status))
    }
}

/// Compute and store the contour of a localization that lacks one
async fn ensure_contour(conn: &mut SqliteConnection, id: i64) -> GcnResult<()> {
    let localization = localizations::load_localization(conn, id)
        .await?
        .ok_or_else(|| GcnError::Internal(format!("localization {} not found", id)))?;

    if localization.contour.is_some() {
        return Ok(());
    }

    let map = localization.map;
    let contour = tokio::task::spawn_blocking(move || compute_contour(&map)).await??;
    localizations::set_contour(conn, id, &contour).await?;
    debug!(localization = %localization.localization_name, "Stored contour");
    Ok(())
}

#[async_trait]
impl NoticeHandler for Ingestor {
    async fn handle(&self, payload: &[u8], topic: &str) -> GcnResult<()> {
        let report = self.ingest(payload).await?;

        if let Err(e) = self.record_skymap_status(payload).await {
            warn!(topic = %topic, ivorn = %report.ivorn, error = %e, "Skymap status update failed");
        }
        Ok(())
    }
}
