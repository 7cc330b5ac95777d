//! Unit tile naming and memory-mapped `.hgt` rasters.
//!
//! A unit tile covers one 1° × 1° cell named after its **south-west corner**:
//! `{N|S}{lat:02}{E|W}{lon:03}.hgt`, e.g. `N35E138.hgt` or `S13W078.hgt`.
//! Samples are 16-bit big-endian signed integers stored north to south, west
//! to east, with [`VOID_VALUE`] marking voids.

use std::fmt;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::elevation::{Elevation, ResolutionProduct};
use crate::error::{Result, ViewshedError};

/// File size for SRTM1 (1 arc-second, ~30m resolution): 3601 × 3601 × 2 bytes
pub const SRTM1_SIZE: usize = 3601 * 3601 * 2;

/// File size for SRTM3 (3 arc-second, ~90m resolution): 1201 × 1201 × 2 bytes
pub const SRTM3_SIZE: usize = 1201 * 1201 * 2;

const SRTM1_SAMPLES: usize = 3601;
const SRTM3_SAMPLES: usize = 1201;

/// Value indicating no data (void) in `.hgt` files
pub const VOID_VALUE: i16 = -32768;

/// Identity of a 1° × 1° unit tile by its south-west corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub lat: i32,
    pub lon: i32,
}

impl TileKey {
    pub fn new(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }

    /// The tile whose half-open cell contains the coordinate.
    pub fn containing(lat: f64, lon: f64) -> Self {
        Self::new(lat.floor() as i32, lon.floor() as i32)
    }

    /// Canonical `.hgt` filename, e.g. `N35E138.hgt`.
    pub fn filename(&self) -> String {
        format!("{}.hgt", self)
    }

    /// Whether the coordinate falls on this tile, edges inclusive.
    pub fn covers(&self, lat: f64, lon: f64) -> bool {
        let (lat0, lon0) = (self.lat as f64, self.lon as f64);
        (lat0..=lat0 + 1.0).contains(&lat) && (lon0..=lon0 + 1.0).contains(&lon)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lat_prefix = if self.lat >= 0 { 'N' } else { 'S' };
        let lon_prefix = if self.lon >= 0 { 'E' } else { 'W' };
        write!(
            f,
            "{}{:02}{}{:03}",
            lat_prefix,
            self.lat.abs(),
            lon_prefix,
            self.lon.abs()
        )
    }
}

/// Sample count per edge and product for a raw `.hgt` byte length.
pub fn detect_resolution(size: usize) -> Option<(usize, ResolutionProduct)> {
    match size {
        SRTM1_SIZE => Some((SRTM1_SAMPLES, ResolutionProduct::High)),
        SRTM3_SIZE => Some((SRTM3_SAMPLES, ResolutionProduct::Standard)),
        _ => None,
    }
}

/// A memory-mapped unit tile.
///
/// # Example
///
/// ```ignore
/// use viewshed::{TileKey, UnitTile};
///
/// let tile = UnitTile::open("N35E138.hgt", TileKey::new(35, 138))?;
/// let elevation = tile.sample(35.5, 138.5);
/// ```
pub struct UnitTile {
    data: Mmap,
    samples: usize,
    product: ResolutionProduct,
    key: TileKey,
}

impl UnitTile {
    /// Map a `.hgt` file. The product is detected from the file size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, or its size
    /// matches neither SRTM1 nor SRTM3.
    pub fn open<P: AsRef<Path>>(path: P, key: TileKey) -> Result<Self> {
        let file = File::open(&path)?;

        // SAFETY: the file is opened read-only and cache files are only ever
        // replaced by rename, never rewritten in place.
        let mmap = unsafe { Mmap::map(&file)? };

        let (samples, product) =
            detect_resolution(mmap.len()).ok_or_else(|| ViewshedError::InvalidFileSize {
                path: path.as_ref().to_path_buf(),
                size: mmap.len(),
            })?;

        Ok(Self {
            data: mmap,
            samples,
            product,
            key,
        })
    }

    /// Nearest-sample elevation at a coordinate on this tile.
    ///
    /// Coordinates off the tile and void samples are [`Elevation::Absent`].
    pub fn sample(&self, lat: f64, lon: f64) -> Elevation {
        if !self.key.covers(lat, lon) {
            return Elevation::Absent;
        }
        let lat_frac = lat - self.key.lat as f64;
        let lon_frac = lon - self.key.lon as f64;

        // Row 0 is the north edge
        let last = (self.samples - 1) as f64;
        let row = ((1.0 - lat_frac) * last).round() as usize;
        let col = (lon_frac * last).round() as usize;

        Elevation::from_sample(self.raw_at(row, col), Some(VOID_VALUE))
    }

    fn raw_at(&self, row: usize, col: usize) -> i16 {
        let row = row.min(self.samples - 1);
        let col = col.min(self.samples - 1);
        let offset = (row * self.samples + col) * 2;
        i16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    pub fn product(&self) -> ResolutionProduct {
        self.product
    }

    /// Samples per row/column (1201 or 3601).
    pub fn samples(&self) -> usize {
        self.samples
    }
}

impl fmt::Debug for UnitTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitTile")
            .field("key", &self.key)
            .field("product", &self.product)
            .field("samples", &self.samples)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn put(data: &mut [u8], row: usize, col: usize, value: i16) {
        let offset = (row * SRTM3_SAMPLES + col) * 2;
        data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// SRTM3 tile with known corner, center and void values
    fn create_test_srtm3_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let mut data = vec![0u8; SRTM3_SIZE];

        put(&mut data, 0, 0, 1000); // north-west corner
        put(&mut data, 600, 600, 500); // center
        put(&mut data, 1200, 1200, 100); // south-east corner
        put(&mut data, 300, 300, VOID_VALUE);

        file.write_all(&data).unwrap();
        file
    }

    #[test]
    fn test_filename_positive_and_negative() {
        assert_eq!(TileKey::containing(35.5, 138.7).filename(), "N35E138.hgt");
        assert_eq!(TileKey::containing(-12.3, -77.1).filename(), "S13W078.hgt");
        assert_eq!(TileKey::containing(-0.5, -0.5).filename(), "S01W001.hgt");
        assert_eq!(TileKey::containing(0.0, 0.0).filename(), "N00E000.hgt");
        assert_eq!(TileKey::containing(19.4, -99.1).filename(), "N19W100.hgt");
    }

    #[test]
    fn test_load_srtm3_file() {
        let file = create_test_srtm3_file();
        let tile = UnitTile::open(file.path(), TileKey::new(35, 138)).unwrap();

        assert_eq!(tile.product(), ResolutionProduct::Standard);
        assert_eq!(tile.samples(), SRTM3_SAMPLES);
    }

    #[test]
    fn test_invalid_file_size() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 1000]).unwrap();

        let result = UnitTile::open(file.path(), TileKey::new(35, 138));
        assert!(matches!(
            result,
            Err(ViewshedError::InvalidFileSize { size: 1000, .. })
        ));
    }

    #[test]
    fn test_sample_positions() {
        let file = create_test_srtm3_file();
        let tile = UnitTile::open(file.path(), TileKey::new(35, 138)).unwrap();

        assert_eq!(tile.sample(35.5, 138.5), Elevation::Meters(500.0));
        assert_eq!(tile.sample(36.0, 138.0), Elevation::Meters(1000.0));
        assert_eq!(tile.sample(35.0, 139.0), Elevation::Meters(100.0));
        assert_eq!(tile.sample(35.75, 138.25), Elevation::Absent);
        assert_eq!(tile.sample(37.0, 138.5), Elevation::Absent);
    }
}
