//! Credible-region contours
//!
//! A map is flattened to [`FLAT_ORDER`], each pixel gets the greedy credible
//! level it falls in, and the 50% and 90% boundaries are traced with
//! marching squares on a longitude/latitude grid. The result is stored as a
//! GeoJSON `FeatureCollection`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::GcnResult;
use crate::healpix;
use crate::localization::{MultiOrderMap, FLAT_ORDER};

/// Credible levels (percent) traced for every localization
pub const CONTOUR_LEVELS: [u8; 2] = [50, 90];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub credible_level: u8,
}

/// GeoJSON geometry; coordinates are `[ra, dec]` in degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    MultiLineString { coordinates: Vec<Vec<[f64; 2]>> },
}

impl Feature {
    fn new(geometry: Geometry, credible_level: u8) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry,
            properties: FeatureProperties { credible_level },
        }
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features,
        }
    }
}

/// Contour a localization: max-density point, then one line set per level
pub fn compute_contour(map: &MultiOrderMap) -> GcnResult<FeatureCollection> {
    let prob = map.rasterize(FLAT_ORDER)?;
    let levels = credible_levels(&prob);

    let mut features = Vec::with_capacity(CONTOUR_LEVELS.len() + 1);
    if let Some(peak) = max_posterior(FLAT_ORDER, &prob) {
        features.push(Feature::new(Geometry::Point { coordinates: peak }, 0));
    }
    for level in CONTOUR_LEVELS {
        let coordinates = contour_lines(&levels, FLAT_ORDER, level as f64);
        features.push(Feature::new(Geometry::MultiLineString { coordinates }, level));
    }

    Ok(FeatureCollection::new(features))
}

/// Greedy credible level of each pixel, in percent
///
/// Pixels are visited in decreasing probability; each gets the fraction of
/// total mass accumulated before it, so the most probable pixel is at 0 and
/// the set `{level < L}` is the smallest region holding `L` percent.
pub fn credible_levels(prob: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..prob.len()).collect();
    order.sort_by(|&a, &b| prob[b].total_cmp(&prob[a]).then(a.cmp(&b)));

    let total: f64 = prob.iter().sum();
    let mut levels = vec![100.0; prob.len()];
    if total <= 0.0 {
        return levels;
    }

    let mut cumulative = 0.0;
    for index in order {
        levels[index] = 100.0 * cumulative / total;
        cumulative += prob[index];
    }
    levels
}

/// `[ra, dec]` of the most probable pixel of a flat nested map
pub fn max_posterior(order: u8, prob: &[f64]) -> Option<[f64; 2]> {
    let (ipix, _) = prob
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))?;
    let (theta, phi) = healpix::pix2ang_nest(order, ipix as u64);
    let (ra, dec) = healpix::ang_to_radec(theta, phi);
    Some([ra, dec])
}

/// Boundary polylines of `{credible level < level}`
///
/// `levels` is a flat nested map at `order`. Closed curves repeat their
/// first point at the end; curves crossing ra = 0 are split there.
pub fn contour_lines(levels: &[f64], order: u8, level: f64) -> Vec<Vec<[f64; 2]>> {
    let Some((lat_min, lat_max)) = latitude_band(levels, order, level) else {
        return Vec::new();
    };

    let step = healpix::pixel_resolution(order).to_degrees();
    let grid = Grid::sample(levels, order, step, lat_min, lat_max);
    let segments = grid.segments(level);
    let lines = chain(&segments.pairs);

    lines
        .into_iter()
        .map(|keys| {
            let points: Vec<[f64; 2]> = keys.iter().filter_map(|k| segments.points.get(k).copied()).collect();
            simplify(&points, step * 0.5)
        })
        .filter(|line| line.len() >= 2)
        .collect()
}

/// Latitude range, padded by two pixels, of pixels inside the region
fn latitude_band(levels: &[f64], order: u8, level: f64) -> Option<(f64, f64)> {
    let pad = 2.0 * healpix::pixel_resolution(order).to_degrees();
    let mut band: Option<(f64, f64)> = None;

    for (ipix, value) in levels.iter().enumerate() {
        if *value < level {
            let (theta, _) = healpix::pix2ang_nest(order, ipix as u64);
            let dec = 90.0 - theta.to_degrees();
            band = Some(match band {
                Some((lo, hi)) => (lo.min(dec), hi.max(dec)),
                None => (dec, dec),
            });
        }
    }

    band.map(|(lo, hi)| ((lo - pad).max(-90.0), (hi + pad).min(90.0)))
}

/// Credible levels sampled on a regular ra/dec lattice
struct Grid {
    lons: Vec<f64>,
    lats: Vec<f64>,
    values: Vec<f64>,
}

/// Segment endpoints keyed by lattice edge, plus their coordinates
struct Segments {
    pairs: Vec<(u64, u64)>,
    points: HashMap<u64, [f64; 2]>,
}

impl Grid {
    fn sample(levels: &[f64], order: u8, step: f64, lat_min: f64, lat_max: f64) -> Self {
        let ncols = (360.0 / step).ceil().max(1.0) as usize;
        let lons: Vec<f64> = (0..=ncols).map(|i| 360.0 * i as f64 / ncols as f64).collect();

        let nrows = ((lat_max - lat_min) / step).ceil().max(1.0) as usize;
        let lats: Vec<f64> = (0..=nrows)
            .map(|j| lat_min + (lat_max - lat_min) * j as f64 / nrows as f64)
            .collect();

        let mut values = Vec::with_capacity(lons.len() * lats.len());
        for lat in &lats {
            for lon in &lons {
                let (theta, phi) = healpix::radec_to_ang(*lon, *lat);
                values.push(levels[healpix::ang2pix_nest(order, theta, phi) as usize]);
            }
        }

        Self { lons, lats, values }
    }

    fn value(&self, i: usize, j: usize) -> f64 {
        self.values[j * self.lons.len() + i]
    }

    fn horizontal_key(&self, i: usize, j: usize) -> u64 {
        ((j * self.lons.len() + i) as u64) << 1
    }

    fn vertical_key(&self, i: usize, j: usize) -> u64 {
        (((j * self.lons.len() + i) as u64) << 1) | 1
    }

    fn segments(&self, level: f64) -> Segments {
        let mut pairs = Vec::new();
        let mut points = HashMap::new();

        let crossing = |a: f64, b: f64| -> f64 {
            if (b - a).abs() < f64::EPSILON {
                0.5
            } else {
                ((level - a) / (b - a)).clamp(0.0, 1.0)
            }
        };

        for j in 0..self.lats.len() - 1 {
            for i in 0..self.lons.len() - 1 {
                let bl = self.value(i, j);
                let br = self.value(i + 1, j);
                let tr = self.value(i + 1, j + 1);
                let tl = self.value(i, j + 1);

                let case = (bl < level) as u8
                    | ((br < level) as u8) << 1
                    | ((tr < level) as u8) << 2
                    | ((tl < level) as u8) << 3;
                if case == 0 || case == 15 {
                    continue;
                }

                let bottom = self.horizontal_key(i, j);
                let top = self.horizontal_key(i, j + 1);
                let left = self.vertical_key(i, j);
                let right = self.vertical_key(i + 1, j);

                let (lon0, lon1) = (self.lons[i], self.lons[i + 1]);
                let (lat0, lat1) = (self.lats[j], self.lats[j + 1]);
                let mut point = |key: u64, at: [f64; 2]| {
                    points.entry(key).or_insert(at);
                };
                point(bottom, [lon0 + (lon1 - lon0) * crossing(bl, br), lat0]);
                point(top, [lon0 + (lon1 - lon0) * crossing(tl, tr), lat1]);
                point(left, [lon0, lat0 + (lat1 - lat0) * crossing(bl, tl)]);
                point(right, [lon1, lat0 + (lat1 - lat0) * crossing(br, tr)]);

                let center_inside = (bl + br + tr + tl) / 4.0 < level;
                match case {
                    1 | 14 => pairs.push((left, bottom)),
                    2 | 13 => pairs.push((bottom, right)),
                    3 | 12 => pairs.push((left, right)),
                    4 | 11 => pairs.push((right, top)),
                    6 | 9 => pairs.push((bottom, top)),
                    7 | 8 => pairs.push((left, top)),
                    5 => {
                        if center_inside {
                            pairs.push((bottom, right));
                            pairs.push((left, top));
                        } else {
                            pairs.push((left, bottom));
                            pairs.push((right, top));
                        }
                    }
                    10 => {
                        if center_inside {
                            pairs.push((left, bottom));
                            pairs.push((right, top));
                        } else {
                            pairs.push((bottom, right));
                            pairs.push((left, top));
                        }
                    }
                    _ => {}
                }
            }
        }

        Segments { pairs, points }
    }
}

/// Join segments that share endpoints into polylines of edge keys
fn chain(pairs: &[(u64, u64)]) -> Vec<Vec<u64>> {
    let mut by_key: HashMap<u64, Vec<usize>> = HashMap::new();
    for (index, (a, b)) in pairs.iter().enumerate() {
        by_key.entry(*a).or_default().push(index);
        by_key.entry(*b).or_default().push(index);
    }

    let mut used = vec![false; pairs.len()];
    let mut lines = Vec::new();

    let next_from = |key: u64, used: &mut Vec<bool>| -> Option<u64> {
        let index = by_key.get(&key)?.iter().copied().find(|i| !used[*i])?;
        used[index] = true;
        let (a, b) = pairs[index];
        Some(if a == key { b } else { a })
    };

    for start in 0..pairs.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (a, b) = pairs[start];
        let mut line = vec![a, b];

        let mut end = b;
        while let Some(next) = next_from(end, &mut used) {
            line.push(next);
            end = next;
            if next == a {
                break;
            }
        }

        if line.last() != Some(&a) {
            let mut head = Vec::new();
            let mut begin = a;
            while let Some(prev) = next_from(begin, &mut used) {
                head.push(prev);
                begin = prev;
            }
            head.reverse();
            head.extend(line);
            line = head;
        }

        lines.push(line);
    }

    lines
}

/// Ramer-Douglas-Peucker simplification in the ra/dec plane
fn simplify(points: &[[f64; 2]], tolerance: f64) -> Vec<[f64; 2]> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;
    let mut stack = vec![(0usize, points.len() - 1)];

    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut farthest = first;
        let mut max_distance = 0.0;
        for index in first + 1..last {
            let distance = point_segment_distance(points[index], points[first], points[last]);
            if distance > max_distance {
                max_distance = distance;
                farthest = index;
            }
        }
        if max_distance > tolerance {
            keep[farthest] = true;
            stack.push((first, farthest));
            stack.push((farthest, last));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / length_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a[0] + t * dx, a[1] + t * dy);
    ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt()
}
