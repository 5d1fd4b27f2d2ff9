//! Multi-order sky maps
//!
//! A localization is a list of NUNIQ pixel indices with a probability
//! density (per steradian) for each, plus optional per-pixel distance
//! estimates. Maps come from a published FITS file ([`fits`]) or are
//! synthesized from a position and error ([`analytic`]).

pub mod analytic;
pub mod fits;

pub use analytic::{from_cone, from_ellipse, is_close};
pub use fits::{FitsSkymapFetcher, SkymapFetcher};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GcnError, GcnResult};
use crate::healpix;

/// Order used for dense ("flat") renderings: nside 512
pub const FLAT_ORDER: u8 = 9;

/// Deepest order [`MultiOrderMap::rasterize`] will allocate a grid for
pub const MAX_RASTER_ORDER: u8 = 11;

/// Co-indexed pixel arrays of one sky map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiOrderMap {
    uniq: Vec<u64>,
    probdensity: Vec<f64>,
    distmu: Option<Vec<f64>>,
    distsigma: Option<Vec<f64>>,
    distnorm: Option<Vec<f64>>,
}

impl MultiOrderMap {
    /// Build a map from NUNIQ indices and densities
    pub fn new(uniq: Vec<u64>, probdensity: Vec<f64>) -> GcnResult<Self> {
        if uniq.len() != probdensity.len() {
            return Err(GcnError::InvalidInput(format!(
                "{} pixel indices but {} densities",
                uniq.len(),
                probdensity.len()
            )));
        }
        if let Some(bad) = uniq.iter().find(|u| healpix::uniq2nest(**u).is_err()) {
            return Err(GcnError::InvalidInput(format!("invalid NUNIQ index {}", bad)));
        }
        Ok(Self {
            uniq,
            probdensity,
            distmu: None,
            distsigma: None,
            distnorm: None,
        })
    }

    /// Attach distance columns; each present column must match the pixel count
    pub fn with_distance(
        mut self,
        distmu: Option<Vec<f64>>,
        distsigma: Option<Vec<f64>>,
        distnorm: Option<Vec<f64>>,
    ) -> GcnResult<Self> {
        for (name, column) in [("DISTMU", &distmu), ("DISTSIGMA", &distsigma), ("DISTNORM", &distnorm)] {
            if let Some(values) = column {
                if values.len() != self.uniq.len() {
                    return Err(GcnError::InvalidInput(format!(
                        "{} has {} values for {} pixels",
                        name,
                        values.len(),
                        self.uniq.len()
                    )));
                }
            }
        }
        self.distmu = distmu;
        self.distsigma = distsigma;
        self.distnorm = distnorm;
        Ok(self)
    }

    pub fn uniq(&self) -> &[u64] {
        &self.uniq
    }

    pub fn probdensity(&self) -> &[f64] {
        &self.probdensity
    }

    pub fn distmu(&self) -> Option<&[f64]> {
        self.distmu.as_deref()
    }

    pub fn distsigma(&self) -> Option<&[f64]> {
        self.distsigma.as_deref()
    }

    pub fn distnorm(&self) -> Option<&[f64]> {
        self.distnorm.as_deref()
    }

    pub fn len(&self) -> usize {
        self.uniq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uniq.is_empty()
    }

    /// Iterate `(order, nested ipix, density)`
    pub fn pixels(&self) -> impl Iterator<Item = (u8, u64, f64)> + '_ {
        self.uniq
            .iter()
            .zip(&self.probdensity)
            .filter_map(|(u, d)| healpix::uniq2nest(*u).ok().map(|(o, p)| (o, p, *d)))
    }

    /// Integral of the density over all listed pixels
    pub fn total_probability(&self) -> f64 {
        self.pixels()
            .map(|(order, _, density)| density * healpix::pixel_area(order))
            .sum()
    }

    /// Deepest order present in the map
    pub fn max_order(&self) -> u8 {
        self.pixels().map(|(o, _, _)| o).max().unwrap_or(0)
    }

    /// Probability per pixel of a uniform nested grid at `order`
    ///
    /// Coarser source pixels spread their mass evenly over their children;
    /// finer ones add their mass to the containing pixel. Total mass is
    /// preserved.
    pub fn rasterize(&self, order: u8) -> GcnResult<Vec<f64>> {
        if order > MAX_RASTER_ORDER {
            return Err(GcnError::InvalidInput(format!(
                "raster order {} exceeds {}",
                order, MAX_RASTER_ORDER
            )));
        }
        let mut out = vec![0.0; healpix::npix(order) as usize];

        for (pix_order, ipix, density) in self.pixels() {
            if pix_order >= order {
                let shift = 2 * (pix_order - order) as u32;
                out[(ipix >> shift) as usize] += density * healpix::pixel_area(pix_order);
            } else {
                let shift = 2 * (order - pix_order) as u32;
                let first = (ipix << shift) as usize;
                let count = 1usize << shift;
                let share = density * healpix::pixel_area(order);
                for value in &mut out[first..first + count] {
                    *value += share;
                }
            }
        }

        Ok(out)
    }

    /// Dense probability image at [`FLAT_ORDER`]
    pub fn flat_2d(&self) -> Vec<f64> {
        // FLAT_ORDER is always within range
        self.rasterize(FLAT_ORDER).unwrap_or_default()
    }
}

/// A map together with the name it is stored under
#[derive(Debug, Clone, PartialEq)]
pub struct Skymap {
    pub name: String,
    pub map: MultiOrderMap,
}

/// Name a downloaded map after the last path segment of its URL
pub fn name_from_url(url: &str) -> GcnResult<String> {
    let parsed = Url::parse(url)
        .map_err(|e| GcnError::InvalidInput(format!("bad skymap URL {}: {}", url, e)))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GcnError::InvalidInput(format!("skymap URL {} has no file name", url)))
}
