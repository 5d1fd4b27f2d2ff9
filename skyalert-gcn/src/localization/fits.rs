//! Remote FITS sky maps
//!
//! Handles multi-order (`ORDERING = NUNIQ`) maps as published by LVC, and
//! flat `RING`/`NESTED` HEALPix maps as published by Fermi GBM. Flat maps are
//! compressed into the multi-order representation on load.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::tables::ReadsCol;
use fitsio::FitsFile;
use tracing::{debug, info};

use super::MultiOrderMap;
use crate::error::{GcnError, GcnResult};
use crate::healpix;

const USER_AGENT: &str = concat!("skyalert-gcn/", env!("CARGO_PKG_VERSION"));
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Downloads and decodes published sky maps
#[async_trait]
pub trait SkymapFetcher: Send + Sync {
    /// Fetch the map at `url`
    async fn fetch(&self, url: &str) -> GcnResult<MultiOrderMap>;
}

/// HTTP download followed by a cfitsio read
pub struct FitsSkymapFetcher {
    http_client: reqwest::Client,
}

impl FitsSkymapFetcher {
    pub fn new(timeout: Duration) -> GcnResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| GcnError::SkymapFetch(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl SkymapFetcher for FitsSkymapFetcher {
    async fn fetch(&self, url: &str) -> GcnResult<MultiOrderMap> {
        debug!(url = %url, "Downloading skymap");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| GcnError::SkymapFetch(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GcnError::SkymapFetch(format!("{} returned HTTP {}", url, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GcnError::SkymapFetch(format!("{}: {}", url, e)))?;

        let size = bytes.len();
        let map = tokio::task::spawn_blocking(move || read_fits_bytes(&bytes)).await??;

        info!(url = %url, bytes = size, pixels = map.len(), "Downloaded skymap");
        Ok(map)
    }
}

/// Decode an in-memory FITS file, gzip-compressed or not
pub fn read_fits_bytes(bytes: &[u8]) -> GcnResult<MultiOrderMap> {
    let suffix = if bytes.starts_with(&GZIP_MAGIC) {
        ".fits.gz"
    } else {
        ".fits"
    };

    let mut file = tempfile::Builder::new()
        .prefix("skymap-")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| GcnError::SkymapFetch(format!("temporary file: {}", e)))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| GcnError::SkymapFetch(format!("temporary file: {}", e)))?;

    read_fits_file(file.path())
}

/// Read the sky map stored in the first extension of a FITS file
///
/// Vector columns (`1024E` and similar, as healpy writes them) are read
/// across rows into one flat column.
pub fn read_fits_file(path: &Path) -> GcnResult<MultiOrderMap> {
    let mut fptr = FitsFile::open(path).map_err(fits_error)?;
    let hdu = fptr.hdu(1).map_err(fits_error)?;
    let table = TableLayout::of(&hdu)?;

    let ordering: String = hdu
        .read_key(&mut fptr, "ORDERING")
        .map_err(|_| GcnError::SkymapFetch("missing ORDERING keyword".to_string()))?;
    let ordering = ordering.trim().to_uppercase();

    let read_optional = |fptr: &mut FitsFile, name: &str| -> GcnResult<Option<Vec<f64>>> {
        table.find(name).map(|column| table.read(&hdu, fptr, column)).transpose()
    };
    let distance = [
        read_optional(&mut fptr, "DISTMU")?,
        read_optional(&mut fptr, "DISTSIGMA")?,
        read_optional(&mut fptr, "DISTNORM")?,
    ];

    match ordering.as_str() {
        "NUNIQ" => {
            let uniq = table.find("UNIQ").ok_or_else(|| missing_column("UNIQ"))?;
            let uniq: Vec<i64> = table.read(&hdu, &mut fptr, uniq)?;
            let density = table
                .find("PROBDENSITY")
                .ok_or_else(|| missing_column("PROBDENSITY"))?;
            let probdensity: Vec<f64> = table.read(&hdu, &mut fptr, density)?;
            let uniq = uniq
                .into_iter()
                .map(|u| {
                    u64::try_from(u).map_err(|_| GcnError::SkymapFetch(format!("negative UNIQ {}", u)))
                })
                .collect::<GcnResult<Vec<u64>>>()?;
            let [distmu, distsigma, distnorm] = distance;
            MultiOrderMap::new(uniq, probdensity)?.with_distance(distmu, distsigma, distnorm)
        }
        "RING" | "NESTED" => {
            let nside: i64 = hdu
                .read_key(&mut fptr, "NSIDE")
                .map_err(|_| GcnError::SkymapFetch("missing NSIDE keyword".to_string()))?;
            let column = table
                .find("PROB")
                .or_else(|| table.find("PROBABILITY"))
                .or_else(|| table.columns.first())
                .ok_or_else(|| GcnError::SkymapFetch("table has no columns".to_string()))?;
            let prob: Vec<f64> = table.read(&hdu, &mut fptr, column)?;
            flat_to_multiorder(&ordering, nside, prob, distance)
        }
        other => Err(GcnError::SkymapFetch(format!("unsupported ORDERING {}", other))),
    }
}

/// Column name and elements per row
type TableColumn = (String, usize);

/// Columns and row count of a binary table
struct TableLayout {
    columns: Vec<TableColumn>,
    rows: usize,
}

impl TableLayout {
    fn of(hdu: &FitsHdu) -> GcnResult<Self> {
        match &hdu.info {
            HduInfo::TableInfo {
                column_descriptions,
                num_rows,
            } => Ok(Self {
                columns: column_descriptions
                    .iter()
                    .map(|c| (c.name.clone(), c.data_type.repeat.max(1)))
                    .collect(),
                rows: *num_rows,
            }),
            _ => Err(GcnError::SkymapFetch("first extension is not a table".to_string())),
        }
    }

    fn find(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|(c, _)| c.eq_ignore_ascii_case(name))
    }

    /// Every element of a column, rows concatenated
    fn read<T: ReadsCol>(&self, hdu: &FitsHdu, fptr: &mut FitsFile, column: &TableColumn) -> GcnResult<Vec<T>> {
        let (name, repeat) = column;
        let elements = self.rows * repeat;
        let values: Vec<T> = hdu
            .read_col_range(fptr, name.as_str(), &(0..self.rows))
            .map_err(fits_error)?;
        if values.len() >= elements {
            return Ok(values);
        }
        // Got one element per row; cfitsio continues into the next row once a
        // row's elements run out, so ask for all of them from row one
        hdu.read_col_range(fptr, name.as_str(), &(0..elements))
            .map_err(fits_error)
    }
}

/// Convert a flat HEALPix map into a compressed NUNIQ map
///
/// `prob` holds probability per pixel in `ordering` (`RING` or `NESTED`);
/// `distance` holds the optional DISTMU, DISTSIGMA and DISTNORM columns in
/// the same ordering. Each group of four nested siblings that agree on every
/// column is merged into its parent, repeatedly, so uniform regions are
/// stored at the coarsest order that represents them exactly.
pub fn flat_to_multiorder(
    ordering: &str,
    nside: i64,
    prob: Vec<f64>,
    distance: [Option<Vec<f64>>; 3],
) -> GcnResult<MultiOrderMap> {
    let order = order_of_nside(nside)?;
    let area = healpix::pixel_area(order);

    let mut columns = vec![flat_column_to_nested(ordering, order, prob)?
        .into_iter()
        .map(|p| p / area)
        .collect::<Vec<f64>>()];
    let mut present = [false; 3];
    for (slot, column) in distance.into_iter().enumerate() {
        if let Some(values) = column {
            columns.push(flat_column_to_nested(ordering, order, values)?);
            present[slot] = true;
        }
    }

    let (uniq, merged) = derasterize(order, columns);
    let mut merged = merged.into_iter();
    let probdensity = merged.next().unwrap_or_default();
    let [distmu, distsigma, distnorm] = present.map(|has| if has { merged.next() } else { None });

    MultiOrderMap::new(uniq, probdensity)?.with_distance(distmu, distsigma, distnorm)
}

/// Merge uniform nested sibling quadruples, bottom up
///
/// `columns` are co-indexed nested arrays at `order`. Returns NUNIQ indices
/// sorted ascending and the merged columns co-indexed with them.
pub fn derasterize(order: u8, columns: Vec<Vec<f64>>) -> (Vec<u64>, Vec<Vec<f64>>) {
    let width = columns.len();
    let mut uniq = Vec::new();
    // Row-major, `width` values per emitted tile
    let mut values = Vec::new();

    let mut level = columns;
    let mut whole = vec![true; level.first().map_or(0, Vec::len)];

    for pix_order in (1..=order).rev() {
        let parents = whole.len() / 4;
        let mut next: Vec<Vec<f64>> = (0..width).map(|_| Vec::with_capacity(parents)).collect();
        let mut next_whole = Vec::with_capacity(parents);

        for parent in 0..parents {
            let first = 4 * parent;
            let uniform = whole[first..first + 4].iter().all(|w| *w)
                && level
                    .iter()
                    .all(|col| col[first + 1..first + 4].iter().all(|v| same(*v, col[first])));

            if uniform {
                for (out, col) in next.iter_mut().zip(&level) {
                    out.push(col[first]);
                }
            } else {
                for child in first..first + 4 {
                    if whole[child] {
                        uniq.push(healpix::nest2uniq(pix_order, child as u64));
                        values.extend(level.iter().map(|col| col[child]));
                    }
                }
                for out in next.iter_mut() {
                    out.push(f64::NAN);
                }
            }
            next_whole.push(uniform);
        }

        level = next;
        whole = next_whole;
    }

    for (ipix, _) in whole.iter().enumerate().filter(|(_, w)| **w) {
        uniq.push(healpix::nest2uniq(0, ipix as u64));
        values.extend(level.iter().map(|col| col[ipix]));
    }

    let mut index: Vec<usize> = (0..uniq.len()).collect();
    index.sort_unstable_by_key(|i| uniq[*i]);
    let columns = (0..width)
        .map(|c| index.iter().map(|i| values[i * width + c]).collect())
        .collect();
    let uniq = index.into_iter().map(|i| uniq[i]).collect();
    (uniq, columns)
}

/// Exact equality, with NaN equal to NaN
fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

fn flat_column_to_nested(ordering: &str, order: u8, values: Vec<f64>) -> GcnResult<Vec<f64>> {
    let npix = healpix::npix(order) as usize;
    if values.len() != npix {
        return Err(GcnError::SkymapFetch(format!(
            "flat map has {} values, expected {} for order {}",
            values.len(),
            npix,
            order
        )));
    }

    match ordering {
        "NESTED" => Ok(values),
        "RING" => {
            let mut nested = vec![0.0; npix];
            for (ring, value) in values.into_iter().enumerate() {
                nested[healpix::ring2nest(order, ring as u64) as usize] = value;
            }
            Ok(nested)
        }
        other => Err(GcnError::SkymapFetch(format!("unsupported ORDERING {}", other))),
    }
}

fn order_of_nside(nside: i64) -> GcnResult<u8> {
    if nside <= 0 || nside & (nside - 1) != 0 {
        return Err(GcnError::SkymapFetch(format!("NSIDE {} is not a power of two", nside)));
    }
    let order = nside.trailing_zeros() as u8;
    if order > healpix::MAX_ORDER {
        return Err(GcnError::SkymapFetch(format!("NSIDE {} too large", nside)));
    }
    Ok(order)
}

fn missing_column(name: &str) -> GcnError {
    GcnError::SkymapFetch(format!("table has no {} column", name))
}

fn fits_error(err: fitsio::errors::Error) -> GcnError {
    GcnError::SkymapFetch(format!("FITS: {}", err))
}
