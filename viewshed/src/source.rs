//! Upstream elevation tile sources.
//!
//! A [`TileSource`] stores named unit tiles into a cache directory on request.
//! Sources cap how many unit tiles one request may span; exceeding the cap
//! fails with [`ViewshedError::TileLimitExceeded`] before anything is fetched,
//! and the cache reacts by splitting the request.
//!
//! Two sources ship with the crate:
//!
//! - [`DirectoryTileSource`]: a local mirror laid out as
//!   `<root>/<PRODUCT>/<name>.hgt` or `<root>/<PRODUCT>/<name>.hgt.zip`.
//! - `HttpTileSource` (feature `download`): remote servers, see [`crate::download`].

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::elevation::ResolutionProduct;
use crate::error::{Result, ViewshedError};
use crate::geo::BoundingBox;
use crate::tile::{detect_resolution, TileKey};

/// Default cap on unit tiles per upstream request.
pub const DEFAULT_MAX_TILES_PER_REQUEST: usize = 9;

/// A request for every unit tile touched by a box, for one concrete product.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub bounds: BoundingBox,
    pub product: ResolutionProduct,
    /// Directory receiving `<name>.hgt` files.
    pub dest_dir: &'a Path,
}

/// What a fetch left on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Tiles present in the destination directory after the fetch.
    pub available: Vec<TileKey>,
    /// How many of `available` were transferred by this fetch.
    pub downloaded: usize,
    /// Tiles the upstream has no data for (typically open ocean).
    pub missing: Vec<TileKey>,
}

impl FetchOutcome {
    pub fn merge(&mut self, other: FetchOutcome) {
        self.available.extend(other.available);
        self.downloaded += other.downloaded;
        self.missing.extend(other.missing);
    }
}

/// Result of fetching one unit tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFetch {
    /// The tile was written to its destination path.
    Stored,
    /// The upstream has no data for this cell.
    NotFound,
}

/// An upstream that can store unit tiles into the cache.
pub trait TileSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Maximum unit tiles a single [`TileSource::fetch`] may span.
    fn max_tiles_per_request(&self) -> usize;

    /// Fetch one unit tile and write it to `dest`.
    fn fetch_tile(
        &self,
        key: TileKey,
        product: ResolutionProduct,
        dest: &Path,
    ) -> Result<TileFetch>;

    /// Fetch every unit tile of `request.bounds`, reusing files already on disk.
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchOutcome> {
        let keys = request.bounds.unit_tiles();
        let limit = self.max_tiles_per_request();
        if keys.len() > limit {
            return Err(ViewshedError::TileLimitExceeded {
                requested: keys.len(),
                limit,
            });
        }

        fs::create_dir_all(request.dest_dir)?;

        let mut outcome = FetchOutcome::default();
        for key in keys {
            let dest = request.dest_dir.join(key.filename());
            if dest.exists() {
                outcome.available.push(key);
                continue;
            }
            match self.fetch_tile(key, request.product, &dest)? {
                TileFetch::Stored => {
                    tracing::debug!(source = self.name(), tile = %key, "stored unit tile");
                    outcome.available.push(key);
                    outcome.downloaded += 1;
                }
                TileFetch::NotFound => {
                    tracing::debug!(source = self.name(), tile = %key, "no upstream data");
                    outcome.missing.push(key);
                }
            }
        }
        Ok(outcome)
    }
}

/// A local mirror directory of `.hgt` or `.hgt.zip` tiles, one subdirectory per product.
#[derive(Debug, Clone)]
pub struct DirectoryTileSource {
    root: PathBuf,
    max_tiles_per_request: usize,
}

impl DirectoryTileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_tiles_per_request: DEFAULT_MAX_TILES_PER_REQUEST,
        }
    }

    /// Override the per-request tile cap.
    pub fn with_max_tiles_per_request(mut self, limit: usize) -> Self {
        self.max_tiles_per_request = limit;
        self
    }
}

impl TileSource for DirectoryTileSource {
    fn name(&self) -> &str {
        "directory"
    }

    fn max_tiles_per_request(&self) -> usize {
        self.max_tiles_per_request
    }

    fn fetch_tile(
        &self,
        key: TileKey,
        product: ResolutionProduct,
        dest: &Path,
    ) -> Result<TileFetch> {
        let product_dir = self.root.join(product.dir_name());
        let raw = product_dir.join(key.filename());
        let zipped = product_dir.join(format!("{}.zip", key.filename()));

        let bytes = if raw.is_file() {
            fs::read(&raw)?
        } else if zipped.is_file() {
            extract_hgt_from_zip(&fs::read(&zipped)?, &key.filename())?
        } else {
            return Ok(TileFetch::NotFound);
        };

        check_tile_bytes(&bytes, key, product)?;
        write_atomic(dest, &bytes)?;
        Ok(TileFetch::Stored)
    }
}

/// Reject payloads that are not a unit tile of the requested product.
pub(crate) fn check_tile_bytes(
    bytes: &[u8],
    key: TileKey,
    product: ResolutionProduct,
) -> Result<()> {
    match detect_resolution(bytes.len()) {
        Some((_, found)) if found == product => Ok(()),
        Some((_, found)) => Err(ViewshedError::DownloadFailed {
            filename: key.filename(),
            reason: format!("expected {} tile, got {}", product, found),
        }),
        None => Err(ViewshedError::DownloadFailed {
            filename: key.filename(),
            reason: format!("unexpected tile size {} bytes", bytes.len()),
        }),
    }
}

/// Write through a sibling `.part` file and rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let mut file = fs::File::create(&partial)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&partial, path)?;
    Ok(())
}

/// Extract the first `.hgt` entry (case-insensitive) from a ZIP archive.
pub(crate) fn extract_hgt_from_zip(data: &[u8], filename: &str) -> Result<Vec<u8>> {
    let mut archive =
        ZipArchive::new(Cursor::new(data)).map_err(|e| ViewshedError::DownloadFailed {
            filename: filename.to_string(),
            reason: format!("Failed to read ZIP archive: {}", e),
        })?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| ViewshedError::DownloadFailed {
            filename: filename.to_string(),
            reason: format!("Failed to read ZIP entry: {}", e),
        })?;

        if entry.name().to_lowercase().ends_with(".hgt") {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| ViewshedError::DownloadFailed {
                    filename: filename.to_string(),
                    reason: format!("Failed to extract .hgt from ZIP: {}", e),
                })?;
            return Ok(contents);
        }
    }

    Err(ViewshedError::DownloadFailed {
        filename: filename.to_string(),
        reason: "No .hgt file found in ZIP archive".to_string(),
    })
}
