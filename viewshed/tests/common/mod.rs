//! Synthetic SRTM3 mirrors shared by the integration scenarios.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use viewshed::source::TileFetch;
use viewshed::{
    DirectoryTileSource, ElevationCache, ElevationCacheBuilder, ResolutionProduct, Result,
    TileKey, TileSource, ViewshedError, VOID_VALUE,
};

pub const SRTM3_SAMPLES: usize = 1201;

/// Longitude of the north-south ridge in [`ridge_tile`].
pub const RIDGE_LON: f64 = 8.5;

/// Write an SRTM3 tile whose samples come from `height(row, col)`.
pub fn write_srtm3(dir: &Path, name: &str, height: impl Fn(usize, usize) -> i16) {
    let mut data = Vec::with_capacity(SRTM3_SAMPLES * SRTM3_SAMPLES * 2);
    for row in 0..SRTM3_SAMPLES {
        for col in 0..SRTM3_SAMPLES {
            data.extend_from_slice(&height(row, col).to_be_bytes());
        }
    }
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), data).unwrap();
}

/// Mirror with flat sea-level SRTM3 tiles.
pub fn flat_mirror(names: &[&str]) -> TempDir {
    let mirror = TempDir::new().unwrap();
    for name in names {
        write_srtm3(&mirror.path().join("SRTM3"), name, |_, _| 0);
    }
    mirror
}

/// N47E008 with a 300 m ridge running north-south at [`RIDGE_LON`].
pub fn ridge_mirror() -> TempDir {
    let mirror = TempDir::new().unwrap();
    let ridge_col = ((RIDGE_LON - 8.0) * 1200.0).round() as usize;
    write_srtm3(&mirror.path().join("SRTM3"), "N47E008.hgt", |_, col| {
        if col.abs_diff(ridge_col) <= 2 {
            300
        } else {
            0
        }
    });
    mirror
}

/// Tile made entirely of void samples.
pub fn void_mirror(name: &str) -> TempDir {
    let mirror = TempDir::new().unwrap();
    write_srtm3(&mirror.path().join("SRTM3"), name, |_, _| VOID_VALUE);
    mirror
}

pub fn cache_over(mirror: &Path, cache_dir: &Path) -> ElevationCache {
    ElevationCacheBuilder::new(cache_dir)
        .mirror_dir(mirror)
        .build()
        .unwrap()
}

/// How a [`CountingSource`] fails once its healthy transfers are used up.
#[derive(Debug, Clone, Copy)]
pub enum Outage {
    Refused,
    TimedOut,
}

impl Outage {
    fn error(self, key: TileKey) -> ViewshedError {
        match self {
            Outage::Refused => ViewshedError::DownloadFailed {
                filename: key.filename(),
                reason: "HTTP 503".to_string(),
            },
            Outage::TimedOut => ViewshedError::Timeout {
                url: format!("https://mirror.invalid/{}", key.filename()),
                timeout_secs: 30,
            },
        }
    }
}

/// Directory source that counts unit tile transfers.
#[derive(Clone)]
pub struct CountingSource {
    inner: DirectoryTileSource,
    pub transfers: Arc<AtomicUsize>,
    outage: Option<(usize, Outage)>,
}

impl CountingSource {
    pub fn new(mirror: &Path, max_tiles_per_request: usize) -> Self {
        let inner = DirectoryTileSource::new(mirror);
        Self {
            inner: inner.with_max_tiles_per_request(max_tiles_per_request),
            transfers: Arc::new(AtomicUsize::new(0)),
            outage: None,
        }
    }

    /// Serve `healthy` transfers, then fail every later one.
    pub fn failing_after(mut self, healthy: usize, outage: Outage) -> Self {
        self.outage = Some((healthy, outage));
        self
    }

    pub fn count(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }
}

impl TileSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    fn max_tiles_per_request(&self) -> usize {
        self.inner.max_tiles_per_request()
    }

    fn fetch_tile(
        &self,
        key: TileKey,
        product: ResolutionProduct,
        dest: &Path,
    ) -> Result<TileFetch> {
        let index = self.transfers.fetch_add(1, Ordering::SeqCst);
        match self.outage {
            Some((healthy, outage)) if index >= healthy => Err(outage.error(key)),
            _ => self.inner.fetch_tile(key, product, dest),
        }
    }
}
