//! # Viewshed - Radio Line-of-Sight over SRTM Terrain
//!
//! Computes which points around an antenna are in radio line of sight, and
//! searches a region for the antenna site that sees the most of a target
//! area, using SRTM `.hgt` elevation tiles.
//!
//! ## Features
//!
//! - **Tile cache**: unit tiles are fetched in chunks, stored on disk under a
//!   coverage manifest and memory-mapped on demand
//! - **Resolution products**: High (SRTM1, ~30 m), Standard (SRTM3, ~90 m) and
//!   Adaptive (High where available, Standard elsewhere)
//! - **Line of sight**: geodesic path sampling with Earth curvature and a
//!   clearance margin
//! - **Viewsheds** over a lattice around the observer, classified in parallel
//! - **Site optimization**: coarse lattice search refined by hill climbing
//!
//! ## Quick Start
//!
//! ```ignore
//! use viewshed::{compute_viewshed, ElevationCacheBuilder, GeoPoint, RunControl, ViewshedRequest};
//!
//! let cache = ElevationCacheBuilder::new("/data/viewshed-cache")
//!     .mirror_dir("/data/srtm")
//!     .build()?;
//!
//! let request = ViewshedRequest::new(GeoPoint::new(35.36, 138.73), 30.0, 20.0, 101);
//! let result = compute_viewshed(&cache, &request, RunControl::new())?;
//! println!("{:.1}% visible", result.visibility_pct());
//! ```
//!
//! ## Cargo features
//!
//! - `download`: fetch missing tiles over HTTP (ArduPilot terrain server or a
//!   custom URL template)
//! - `geojson`: export results as GeoJSON FeatureCollections

pub mod cache;
pub mod control;
#[cfg(feature = "download")]
pub mod download;
pub mod elevation;
pub mod error;
pub mod geo;
#[cfg(feature = "geojson")]
pub mod geojson;
pub mod grid;
pub mod los;
pub mod manifest;
pub mod mosaic;
pub mod optimizer;
pub mod source;
pub mod tile;

// Re-export main types at crate root for convenience
pub use cache::{CacheStats, ElevationCache, ElevationCacheBuilder, TileHandle};
pub use control::{CancellationToken, ProgressCallback, RunControl};
#[cfg(feature = "download")]
pub use download::{DownloadConfig, DownloadSource, HttpTileSource};
pub use elevation::{Elevation, ResolutionProduct};
pub use error::{Result, ViewshedError};
pub use geo::{BoundingBox, GeoPoint};
pub use grid::{compute_viewshed, ViewshedRequest, ViewshedResult};
pub use los::{is_visible, CurvatureModel, LosParams, Observer, Terrain, VisibilityResult};
pub use optimizer::{
    optimize_coverage, CoverageCandidate, OptimizationResult, OptimizeRequest,
};
pub use source::{DirectoryTileSource, TileSource};
pub use tile::{TileKey, UnitTile, VOID_VALUE};
