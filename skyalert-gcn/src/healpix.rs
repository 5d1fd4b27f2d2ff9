//! HEALPix nested-scheme primitives
//!
//! Angles follow the HEALPix convention: `theta` is colatitude in radians
//! (0 at the north pole), `phi` is longitude in radians. Multi-resolution
//! indices use the NUNIQ packing `uniq = 4 * 4^order + ipix`.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use crate::error::{GcnError, GcnResult};

/// Deepest order whose NUNIQ index still fits in 64 bits
pub const MAX_ORDER: u8 = 29;

const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

/// Pixels along one side of a base pixel
pub fn nside(order: u8) -> u64 {
    1u64 << order
}

/// Number of pixels covering the sphere at `order`
pub fn npix(order: u8) -> u64 {
    12 * nside(order) * nside(order)
}

/// Area of one pixel at `order`, in steradians
pub fn pixel_area(order: u8) -> f64 {
    4.0 * PI / npix(order) as f64
}

/// Pixel resolution (square root of the pixel area), in radians
pub fn pixel_resolution(order: u8) -> f64 {
    pixel_area(order).sqrt()
}

/// Coarsest order whose resolution is no coarser than `resolution` radians
///
/// Rounds up in pixel count; never returns an order coarser than requested.
pub fn order_for_resolution(resolution: f64) -> GcnResult<u8> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(GcnError::InvalidInput(format!(
            "pixel resolution must be positive, got {}",
            resolution
        )));
    }

    let nside = (PI / 3.0).sqrt() / resolution;
    let level = nside.log2().ceil();
    if level <= 0.0 {
        Ok(0)
    } else if level >= MAX_ORDER as f64 {
        Ok(MAX_ORDER)
    } else {
        Ok(level as u8)
    }
}

/// Pack a nested pixel index into a NUNIQ index
pub fn nest2uniq(order: u8, ipix: u64) -> u64 {
    (4u64 << (2 * order as u32)) + ipix
}

/// Unpack a NUNIQ index into `(order, nested ipix)`
pub fn uniq2nest(uniq: u64) -> GcnResult<(u8, u64)> {
    if uniq < 4 {
        return Err(GcnError::InvalidInput(format!("invalid NUNIQ index {}", uniq)));
    }
    let msb = 63 - uniq.leading_zeros();
    let order = msb / 2 - 1;
    if order > MAX_ORDER as u32 {
        return Err(GcnError::InvalidInput(format!("NUNIQ index {} too deep", uniq)));
    }
    let ipix = uniq - (4u64 << (2 * order));
    Ok((order as u8, ipix))
}

/// Take every other bit (the x or y half of a Morton code)
fn compress_bits(v: u64) -> u64 {
    let mut out = 0;
    for i in 0..32 {
        out |= ((v >> (2 * i)) & 1) << i;
    }
    out
}

/// Inverse of [`compress_bits`]
fn spread_bits(v: u64) -> u64 {
    let mut out = 0;
    for i in 0..32 {
        out |= ((v >> i) & 1) << (2 * i);
    }
    out
}

fn nest2xyf(order: u8, ipix: u64) -> (i64, i64, usize) {
    let npface_bits = 2 * order as u32;
    let face = (ipix >> npface_bits) as usize;
    let ipf = ipix & ((1u64 << npface_bits) - 1);
    (
        compress_bits(ipf) as i64,
        compress_bits(ipf >> 1) as i64,
        face,
    )
}

fn xyf2nest(order: u8, ix: i64, iy: i64, face: usize) -> u64 {
    ((face as u64) << (2 * order as u32)) + spread_bits(ix as u64) + (spread_bits(iy as u64) << 1)
}

/// Center of a nested pixel as `(theta, phi)`
pub fn pix2ang_nest(order: u8, ipix: u64) -> (f64, f64) {
    let (ix, iy, face) = nest2xyf(order, ipix);
    let nside = nside(order) as i64;
    let nl4 = 4 * nside;
    let fact2 = 4.0 / (12 * nside * nside) as f64;
    let fact1 = (2 * nside) as f64 * fact2;

    let jr = JRLL[face] * nside - ix - iy - 1;

    let (nr, z, kshift) = if jr < nside {
        (jr, 1.0 - (jr * jr) as f64 * fact2, 0)
    } else if jr > 3 * nside {
        let nr = nl4 - jr;
        (nr, (nr * nr) as f64 * fact2 - 1.0, 0)
    } else {
        (nside, (2 * nside - jr) as f64 * fact1, (jr - nside) & 1)
    };

    let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
    if jp > nl4 {
        jp -= nl4;
    }
    if jp < 1 {
        jp += nl4;
    }

    let phi = (jp as f64 - (kshift + 1) as f64 * 0.5) * (FRAC_PI_2 / nr as f64);
    (z.clamp(-1.0, 1.0).acos(), phi)
}

/// Nested pixel containing `(theta, phi)`
pub fn ang2pix_nest(order: u8, theta: f64, phi: f64) -> u64 {
    let nside = nside(order) as i64;
    let z = theta.cos();
    let za = z.abs();
    let tt = phi.rem_euclid(TAU) * (2.0 / PI);

    let (ix, iy, face) = if za <= 2.0 / 3.0 {
        let temp1 = nside as f64 * (0.5 + tt);
        let temp2 = nside as f64 * (z * 0.75);
        let jp = (temp1 - temp2) as i64;
        let jm = (temp1 + temp2) as i64;
        let ifp = jp >> order;
        let ifm = jm >> order;
        let face = if ifp == ifm {
            ifp | 4
        } else if ifp < ifm {
            ifp
        } else {
            ifm + 8
        };
        (jm & (nside - 1), nside - (jp & (nside - 1)) - 1, face as usize)
    } else {
        let ntt = (tt as i64).min(3);
        let tp = tt - ntt as f64;
        let tmp = nside as f64 * (3.0 * (1.0 - za)).sqrt();
        let jp = ((tp * tmp) as i64).min(nside - 1);
        let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);
        if z >= 0.0 {
            (nside - jm - 1, nside - jp - 1, ntt as usize)
        } else {
            (jp, jm, (ntt + 8) as usize)
        }
    };

    xyf2nest(order, ix, iy, face)
}

fn isqrt(v: i64) -> i64 {
    let mut r = (v as f64).sqrt() as i64;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}

/// Convert a RING-ordered pixel index to NESTED ordering
pub fn ring2nest(order: u8, ipix: u64) -> u64 {
    let nside = nside(order) as i64;
    let pix = ipix as i64;
    let nl2 = 2 * nside;
    let ncap = 2 * nside * (nside - 1);
    let npix = 12 * nside * nside;

    let (iring, iphi, kshift, nr, face) = if pix < ncap {
        // North polar cap
        let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
        let iphi = (pix + 1) - 2 * iring * (iring - 1);
        (iring, iphi, 0, iring, ((iphi - 1) / iring) as usize)
    } else if pix < npix - ncap {
        // Equatorial belt
        let ip = pix - ncap;
        let tmp = ip >> (order as u32 + 2);
        let iring = tmp + nside;
        let iphi = ip - tmp * 4 * nside + 1;
        let kshift = (iring + nside) & 1;
        let ire = tmp + 1;
        let irm = nl2 + 2 - ire;
        let ifm = (iphi - ire / 2 + nside - 1) >> order;
        let ifp = (iphi - irm / 2 + nside - 1) >> order;
        let face = if ifp == ifm {
            ifp | 4
        } else if ifp < ifm {
            ifp
        } else {
            ifm + 8
        };
        (iring, iphi, kshift, nside, face as usize)
    } else {
        // South polar cap
        let ip = npix - pix;
        let ir = (1 + isqrt(2 * ip - 1)) >> 1;
        let iphi = 4 * ir + 1 - (ip - 2 * ir * (ir - 1));
        (2 * nl2 - ir, iphi, 0, ir, ((iphi - 1) / ir + 8) as usize)
    };

    let irt = iring - JRLL[face] * nside + 1;
    let mut ipt = 2 * iphi - JPLL[face] * nr - kshift - 1;
    if ipt >= nl2 {
        ipt -= 8 * nside;
    }

    xyf2nest(order, (ipt - irt) >> 1, (-ipt - irt) >> 1, face)
}

/// Unit vector for `(theta, phi)`
pub fn ang2vec(theta: f64, phi: f64) -> [f64; 3] {
    let st = theta.sin();
    [st * phi.cos(), st * phi.sin(), theta.cos()]
}

/// Angle between two unit vectors, in radians (stable at small separations)
pub fn angle_between(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let cross = [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ];
    let cross_norm = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt();
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    cross_norm.atan2(dot)
}

/// `(ra, dec)` in degrees to `(theta, phi)` in radians
pub fn radec_to_ang(ra_deg: f64, dec_deg: f64) -> (f64, f64) {
    ((90.0 - dec_deg).to_radians(), ra_deg.to_radians())
}

/// `(theta, phi)` in radians to `(ra, dec)` in degrees, ra in [0, 360)
pub fn ang_to_radec(theta: f64, phi: f64) -> (f64, f64) {
    (phi.to_degrees().rem_euclid(360.0), 90.0 - theta.to_degrees())
}

/// Upper bound on the center-to-corner angle of any pixel at `order`
fn max_pixrad(order: u8) -> f64 {
    let nside = nside(order) as f64;
    let va = {
        let z: f64 = 2.0 / 3.0;
        let phi = PI / (4.0 * nside);
        ang2vec(z.acos(), phi)
    };
    let t1 = (1.0 - 1.0 / nside).powi(2);
    let vb = ang2vec((1.0 - t1 / 3.0).acos(), 0.0);
    angle_between(&va, &vb)
}

/// Nested pixels at `order` whose centers satisfy a predicate
///
/// Descends the pixel hierarchy from the twelve base pixels. `accept` is
/// called with a pixel center and a slack angle: at `order` the slack is
/// zero and `accept` decides membership; above it the slack bounds how far
/// any descendant center can lie from this center, and returning false
/// prunes the subtree. Output is unsorted.
pub fn query_centers<F>(order: u8, mut accept: F) -> Vec<u64>
where
    F: FnMut(&[f64; 3], f64) -> bool,
{
    let mut selected = Vec::new();
    let mut stack: Vec<(u8, u64)> = (0..12u64).map(|p| (0u8, p)).collect();

    while let Some((level, ipix)) = stack.pop() {
        let (theta, phi) = pix2ang_nest(level, ipix);
        let center = ang2vec(theta, phi);

        if level == order {
            if accept(&center, 0.0) {
                selected.push(ipix);
            }
        } else if accept(&center, max_pixrad(level)) {
            let first_child = ipix << 2;
            for child in first_child..first_child + 4 {
                stack.push((level + 1, child));
            }
        }
    }

    selected
}

/// Nested pixels at `order` whose centers lie within `radius` of `center`
pub fn query_disc_centers(order: u8, center: &[f64; 3], radius: f64) -> Vec<u64> {
    query_centers(order, |v, slack| angle_between(v, center) <= radius + slack)
}

/// Position angle of `to` as seen from `from`, east of north, in radians
pub fn position_angle(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (ra1, dec1) = from;
    let (ra2, dec2) = to;
    let dra = ra2 - ra1;
    (dra.sin() * dec2.cos()).atan2(dec1.cos() * dec2.sin() - dec1.sin() * dec2.cos() * dra.cos())
}
