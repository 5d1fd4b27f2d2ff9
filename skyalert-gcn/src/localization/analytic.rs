//! Gaussian sky maps built from a position and its uncertainty

use tracing::debug;

use super::{MultiOrderMap, Skymap};
use crate::error::{GcnError, GcnResult};
use crate::healpix;

/// Pixels per 1-sigma length along the narrowest axis
const PIXELS_PER_SIGMA: f64 = 16.0;

/// Hard cutoff, in sigmas, beyond which density is omitted
const CUTOFF_SIGMA: f64 = 4.0;

/// Circular Gaussian centered on `(ra, dec)` with 1-sigma radius `error`
///
/// All arguments are in degrees. Pixels are emitted in ascending NUNIQ order
/// and the densities integrate to one over the emitted pixels.
pub fn from_cone(ra: f64, dec: f64, error: f64) -> GcnResult<Skymap> {
    check_position(ra, dec)?;
    check_positive("error radius", error)?;

    let radius = error.to_radians();
    let order = healpix::order_for_resolution(radius / PIXELS_PER_SIGMA)?;
    let center = center_vector(ra, dec);

    let mut ipix = healpix::query_disc_centers(order, &center, CUTOFF_SIGMA * radius);
    if ipix.is_empty() {
        ipix.push(center_pixel(order, ra, dec));
    }
    ipix.sort_unstable();

    let densities = ipix
        .iter()
        .map(|p| {
            let (theta, phi) = healpix::pix2ang_nest(order, *p);
            let separation = healpix::angle_between(&healpix::ang2vec(theta, phi), &center);
            (-0.5 * (separation / radius).powi(2)).exp()
        })
        .collect();

    debug!(ra, dec, error, order, pixels = ipix.len(), "Built cone localization");

    Ok(Skymap {
        name: format!("{:.5}_{:.5}_{:.5}", ra, dec, error),
        map: normalized(order, ipix, densities)?,
    })
}

/// Elliptical Gaussian centered on `(ra, dec)`
///
/// `amaj` and `amin` are 1-sigma semi-axes and `phi` is the position angle
/// of the major axis, east of north; all in degrees.
pub fn from_ellipse(ra: f64, dec: f64, amaj: f64, amin: f64, phi: f64) -> GcnResult<Skymap> {
    check_position(ra, dec)?;
    check_positive("semi-major axis", amaj)?;
    check_positive("semi-minor axis", amin)?;
    if !phi.is_finite() {
        return Err(GcnError::InvalidInput(format!("position angle {} is not finite", phi)));
    }
    if amin > amaj {
        return Err(GcnError::InvalidInput(format!(
            "semi-minor axis {} exceeds semi-major axis {}",
            amin, amaj
        )));
    }

    let (amaj_rad, amin_rad, phi_rad) = (amaj.to_radians(), amin.to_radians(), phi.to_radians());
    let order = healpix::order_for_resolution(amin_rad / PIXELS_PER_SIGMA)?;
    let center = center_vector(ra, dec);
    let center_radec = (ra.to_radians(), dec.to_radians());

    // Mahalanobis distance in the tangent plane at the center
    let mahalanobis = |v: &[f64; 3]| -> f64 {
        let separation = healpix::angle_between(v, &center);
        let angle = healpix::position_angle(center_radec, vec_to_radec(v)) - phi_rad;
        let along = separation * angle.cos() / amaj_rad;
        let across = separation * angle.sin() / amin_rad;
        (along * along + across * across).sqrt()
    };

    // Tangent-plane distortion stays well under 5% inside the cutoff disc
    let mut ipix = healpix::query_centers(order, |v, slack| {
        healpix::angle_between(v, &center) <= CUTOFF_SIGMA * amaj_rad + slack
            && mahalanobis(v) - 1.05 * slack / amin_rad <= CUTOFF_SIGMA
    });
    if ipix.is_empty() {
        ipix.push(center_pixel(order, ra, dec));
    }
    ipix.sort_unstable();

    let densities = ipix
        .iter()
        .map(|p| {
            let (theta, phi) = healpix::pix2ang_nest(order, *p);
            (-0.5 * mahalanobis(&healpix::ang2vec(theta, phi)).powi(2)).exp()
        })
        .collect();

    debug!(ra, dec, amaj, amin, phi, order, pixels = ipix.len(), "Built ellipse localization");

    Ok(Skymap {
        name: format!("{:.5}_{:.5}_{:.5}_{:.5}_{:.5}", ra, dec, amaj, amin, phi),
        map: normalized(order, ipix, densities)?,
    })
}

/// Floating-point closeness with numpy's default tolerances
pub fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

fn normalized(order: u8, ipix: Vec<u64>, mut densities: Vec<f64>) -> GcnResult<MultiOrderMap> {
    let norm = densities.iter().sum::<f64>() * healpix::pixel_area(order);
    if !norm.is_finite() || norm <= 0.0 {
        return Err(GcnError::Internal("Gaussian kernel vanished on every pixel".to_string()));
    }
    for density in &mut densities {
        *density /= norm;
    }
    let uniq = ipix.into_iter().map(|p| healpix::nest2uniq(order, p)).collect();
    MultiOrderMap::new(uniq, densities)
}

fn center_vector(ra: f64, dec: f64) -> [f64; 3] {
    let (theta, phi) = healpix::radec_to_ang(ra, dec);
    healpix::ang2vec(theta, phi)
}

fn center_pixel(order: u8, ra: f64, dec: f64) -> u64 {
    let (theta, phi) = healpix::radec_to_ang(ra, dec);
    healpix::ang2pix_nest(order, theta, phi)
}

/// `(ra, dec)` in radians for a unit vector
fn vec_to_radec(v: &[f64; 3]) -> (f64, f64) {
    (v[1].atan2(v[0]), v[2].clamp(-1.0, 1.0).asin())
}

fn check_position(ra: f64, dec: f64) -> GcnResult<()> {
    if !ra.is_finite() || !dec.is_finite() || !(-90.0..=90.0).contains(&dec) {
        return Err(GcnError::InvalidInput(format!("invalid position ({}, {})", ra, dec)));
    }
    Ok(())
}

fn check_positive(what: &str, value: f64) -> GcnResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(GcnError::InvalidInput(format!("{} must be positive, got {}", what, value)));
    }
    Ok(())
}
