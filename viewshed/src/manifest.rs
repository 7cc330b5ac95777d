//! On-disk record of completed coverage.
//!
//! One `manifest.json` per concrete product lists every bounding box whose
//! download finished, with the unit tiles it resolved to. An entry is only
//! recorded after all of its chunks completed, so an interrupted population
//! never shows up as covered. High boxes the upstream has no data for at all
//! are recorded with an empty tile list.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::elevation::ResolutionProduct;
use crate::error::{Result, ViewshedError};
use crate::geo::BoundingBox;
use crate::source::write_atomic;
use crate::tile::TileKey;

/// Manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// One completed coverage request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub product: ResolutionProduct,
    pub bounds: BoundingBox,
    /// Unit tiles stored in the cache for this box.
    pub tiles: Vec<TileKey>,
    /// Unit tiles the upstream has no data for.
    #[serde(default)]
    pub missing: Vec<TileKey>,
    /// Completion time, seconds since the Unix epoch.
    pub completed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
    #[serde(skip)]
    path: PathBuf,
}

impl Manifest {
    /// Load from `path`. A missing file is an empty manifest; so is an
    /// unreadable one, which is logged and will be overwritten on next save.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Manifest>(&text) {
            Ok(mut manifest) if manifest.version == MANIFEST_VERSION => {
                manifest.path = path;
                Ok(manifest)
            }
            Ok(manifest) => {
                tracing::warn!(
                    path = %path.display(),
                    version = manifest.version,
                    "ignoring manifest with unknown version"
                );
                Ok(Self::empty(path))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt manifest");
                Ok(Self::empty(path))
            }
        }
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: Vec::new(),
            path,
        }
    }

    /// First recorded entry whose box contains `bounds`.
    pub fn covering(&self, bounds: &BoundingBox) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.bounds.contains_box(bounds))
    }

    /// Record a completed box, replacing any entry with identical bounds.
    pub fn record(
        &mut self,
        product: ResolutionProduct,
        bounds: BoundingBox,
        mut tiles: Vec<TileKey>,
        mut missing: Vec<TileKey>,
    ) {
        tiles.sort();
        tiles.dedup();
        missing.sort();
        missing.dedup();

        let completed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.entries.retain(|e| e.bounds != bounds);
        self.entries.push(ManifestEntry {
            product,
            bounds,
            tiles,
            missing,
            completed_at,
        });
    }

    /// Write atomically to the manifest path.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| ViewshedError::Manifest {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &json)
    }
}
