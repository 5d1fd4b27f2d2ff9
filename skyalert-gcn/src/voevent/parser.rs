//! Field extraction from validated notices

use chrono::NaiveDateTime;
use skyalert_common::time::parse_dateobs;
use url::Url;

use super::{NoticeType, VoEvent};
use crate::error::{GcnError, GcnResult};

/// Location of the event timestamp
pub const ISOTIME_PATH: [&str; 7] = [
    "WhereWhen",
    "ObsDataLocation",
    "ObservationLocation",
    "AstroCoords",
    "Time",
    "TimeInstant",
    "ISOTime",
];

/// Fields every stored notice carries
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNotice {
    /// Event time, truncated to whole seconds
    pub dateobs: NaiveDateTime,
    pub notice_type: NoticeType,
    pub ivorn: String,
    /// Path component of the ivorn (e.g. `LVC`, `AMON`)
    pub stream: String,
    /// `Who/Date`, verbatim
    pub date: Option<String>,
}

/// Extract the stored fields from a validated notice
pub fn parse(event: &VoEvent<'_>) -> GcnResult<ParsedNotice> {
    let ivorn = event
        .ivorn()
        .ok_or_else(|| GcnError::MissingField("VOEvent@ivorn".to_string()))?
        .to_string();
    let stream = stream_from_ivorn(&ivorn)?;

    let isotime = event
        .text_at(&ISOTIME_PATH)
        .ok_or_else(|| GcnError::MissingField(ISOTIME_PATH.join("/")))?;
    let dateobs = parse_dateobs(isotime)
        .map_err(|e| GcnError::SchemaValidation(format!("bad ISOTime {}: {}", isotime, e)))?;

    let notice_type = NoticeType::from_param(event.what_param_value("Packet_Type"));
    let date = event.text_at(&["Who", "Date"]).map(str::to_string);

    Ok(ParsedNotice {
        dateobs,
        notice_type,
        ivorn,
        stream,
        date,
    })
}

/// Path of an ivorn with leading slashes removed
///
/// `ivo://gwnet/LVC#S190425z-1-Preliminary` yields `LVC`.
pub fn stream_from_ivorn(ivorn: &str) -> GcnResult<String> {
    let url = Url::parse(ivorn)
        .map_err(|e| GcnError::SchemaValidation(format!("unparseable ivorn {}: {}", ivorn, e)))?;
    Ok(url.path().trim_start_matches('/').to_string())
}
