//! Observation timestamp utilities
//!
//! Event timestamps (`dateobs`) are UTC instants truncated to whole seconds and
//! stored as `YYYY-MM-DDTHH:MM:SS` text.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use crate::{Error, Result};

/// Storage format of a `dateobs` value
pub const DATEOBS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse an ISO-8601 timestamp and drop any fractional seconds.
///
/// Accepts an optional fractional part and an optional trailing `Z` or UTC
/// offset. Offsets are converted to UTC before truncation.
pub fn parse_dateobs(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();

    let parsed = if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        dt.with_timezone(&Utc).naive_utc()
    } else {
        let naive = text.strip_suffix('Z').unwrap_or(text);
        NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| Error::InvalidInput(format!("Invalid ISO time '{}': {}", text, e)))?
    };

    Ok(truncate_to_seconds(parsed))
}

/// Discard sub-second precision (truncation, never rounding)
pub fn truncate_to_seconds(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_nanosecond(0).unwrap_or(dt)
}

/// Format a `dateobs` for storage and display
pub fn format_dateobs(dt: &NaiveDateTime) -> String {
    dt.format(DATEOBS_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dateobs_whole_seconds() {
        let dt = parse_dateobs("2019-04-25T08:18:05").unwrap();
        assert_eq!(format_dateobs(&dt), "2019-04-25T08:18:05");
    }

    #[test]
    fn test_parse_dateobs_truncates_fraction() {
        // .999 must not round up to :06
        let dt = parse_dateobs("2019-04-25T08:18:05.999").unwrap();
        assert_eq!(format_dateobs(&dt), "2019-04-25T08:18:05");
    }

    #[test]
    fn test_parse_dateobs_with_zulu_suffix() {
        let dt = parse_dateobs("2019-04-25T08:18:05.017553Z").unwrap();
        assert_eq!(format_dateobs(&dt), "2019-04-25T08:18:05");
    }

    #[test]
    fn test_parse_dateobs_with_offset_converts_to_utc() {
        let dt = parse_dateobs("2019-04-25T10:18:05.5+02:00").unwrap();
        assert_eq!(format_dateobs(&dt), "2019-04-25T08:18:05");
    }

    #[test]
    fn test_parse_dateobs_rejects_garbage() {
        assert!(matches!(parse_dateobs("yesterday"), Err(Error::InvalidInput(_))));
    }
}
