//! Decide where a notice's sky map comes from
//!
//! Conventions are tried in a fixed order and the first match wins:
//! Fermi GBM final position, Fermi GBM subthreshold, the LVC `GW_SKYMAP`
//! group, then the generic position-plus-error-radius cone.

use std::fmt;

use crate::voevent::{child_param, NoticeType, ParsedNotice, VoEvent};

/// 95th percentile of the chi distribution with two degrees of freedom
///
/// `sqrt(-2 ln 0.05)`. AMON reports 90% containment radii; dividing by this
/// recovers a 1-sigma Gaussian radius.
pub const CHI2_PPF_95: f64 = 2.447_746_830_680_816;

/// Streams whose error radius is not a 1-sigma radius
const NINETY_PERCENT_RADIUS_STREAMS: [&str; 1] = ["AMON"];

const POSITION_PATH: [&str; 6] = [
    "WhereWhen",
    "ObsDataLocation",
    "ObservationLocation",
    "AstroCoords",
    "Position2D",
    "Value2",
];

/// Why a notice has no sky map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// LVC retraction (`Retraction = 1`)
    Retracted,
    /// No position and error radius to build a cone from
    NoPosition,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::Retracted => f.write_str("retracted"),
            Unavailable::NoPosition => f.write_str("no position"),
        }
    }
}

/// Outcome of skymap resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Fetch a published multi-order map
    Download { url: String },
    /// Build a circular Gaussian; `error` is a 1-sigma radius in degrees
    Cone { ra: f64, dec: f64, error: f64 },
    /// Terminal, non-error: nothing to localize
    Unavailable(Unavailable),
}

/// Resolve the sky map source for a parsed notice
pub fn resolve(event: &VoEvent<'_>, notice: &ParsedNotice) -> Resolution {
    match notice.notice_type {
        NoticeType::FermiGbmFinPos => {
            if let Some(url) = event.param_value("LocationMap_URL") {
                return Resolution::Download {
                    url: gbm_healpix_url(url),
                };
            }
        }
        NoticeType::FermiGbmSubthresh => {
            if let Some(url) = event.param_value("HealPix_URL") {
                return Resolution::Download {
                    url: url.to_string(),
                };
            }
        }
        _ => {}
    }

    if is_retracted(event) {
        return Resolution::Unavailable(Unavailable::Retracted);
    }

    if let Some(url) = event
        .group("GW_SKYMAP")
        .and_then(|group| child_param(group, "skymap_fits"))
        .and_then(|param| param.attribute("value"))
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        return Resolution::Download {
            url: url.to_string(),
        };
    }

    match cone_parameters(event) {
        Some((ra, dec, mut error)) => {
            if NINETY_PERCENT_RADIUS_STREAMS.contains(&notice.stream.as_str()) {
                error /= CHI2_PPF_95;
            }
            Resolution::Cone { ra, dec, error }
        }
        None => Resolution::Unavailable(Unavailable::NoPosition),
    }
}

/// Turn a GBM location plot URL into the matching HEALPix FITS URL
pub fn gbm_healpix_url(locplot_url: &str) -> String {
    locplot_url
        .replace("http://", "https://")
        .replace("_locplot_", "_healpix_")
        .replace(".png", ".fit")
}

fn is_retracted(event: &VoEvent<'_>) -> bool {
    event
        .param_value("Retraction")
        .and_then(|v| v.parse::<i64>().ok())
        == Some(1)
}

/// `(ra, dec, error)` in degrees, when all three are present and usable
fn cone_parameters(event: &VoEvent<'_>) -> Option<(f64, f64, f64)> {
    let number = |path: &[&str]| -> Option<f64> {
        event
            .text_at(path)
            .and_then(|t| t.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };

    let mut c1_path = POSITION_PATH.to_vec();
    c1_path.push("C1");
    let mut c2_path = POSITION_PATH.to_vec();
    c2_path.push("C2");
    let mut radius_path = POSITION_PATH[..5].to_vec();
    radius_path.push("Error2Radius");

    let ra = number(&c1_path)?;
    let dec = number(&c2_path)?;
    let error = number(&radius_path)?;

    // A zero radius cannot be pixelized; treat it like a missing one
    if error <= 0.0 {
        return None;
    }
    Some((ra, dec, error))
}
