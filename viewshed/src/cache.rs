//! Elevation raster cache.
//!
//! [`ElevationCache`] owns a directory of unit tiles, the coverage manifests
//! describing it, and an in-memory LRU of memory-mapped tiles. Callers ask for
//! coverage of a bounding box with [`ElevationCache::ensure_coverage`] and get
//! back an opaque [`TileHandle`]; point queries against that handle are
//! read-only and safe to run from many threads.
//!
//! Populating a box is serialized per concrete product. The box is cut into
//! chunks aligned to a degree grid, each fetched independently; a chunk the
//! upstream refuses for spanning too many tiles is split into quadrants and
//! requeued, down to a fixed depth.
//!
//! # Example
//!
//! ```ignore
//! use viewshed::{ElevationCacheBuilder, BoundingBox, ResolutionProduct};
//!
//! let cache = ElevationCacheBuilder::new("/data/viewshed")
//!     .mirror_dir("/mnt/srtm-mirror")
//!     .build()?;
//!
//! let bounds = BoundingBox::new(35.0, 138.0, 36.0, 139.0);
//! let handle = cache.ensure_coverage(&bounds, ResolutionProduct::Standard)?;
//! let elevations = cache.get_elevations_batch(&points, &handle);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use moka::sync::Cache;

use crate::elevation::{Elevation, ResolutionProduct};
use crate::error::{Result, ViewshedError};
use crate::geo::{BoundingBox, GeoPoint};
use crate::manifest::{Manifest, ManifestEntry};
use crate::mosaic::Mosaic;
use crate::source::{
    DirectoryTileSource, FetchOutcome, FetchRequest, TileSource, DEFAULT_MAX_TILES_PER_REQUEST,
};
use crate::tile::{TileKey, UnitTile};

#[cfg(feature = "download")]
use crate::download::{DownloadConfig, HttpTileSource};

const DEFAULT_TILE_CACHE_SIZE: u64 = 100;
const DEFAULT_CHUNK_DEG: f64 = 2.0;
const DEFAULT_MAX_SUBDIVISION_DEPTH: u32 = 4;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Unit tiles currently held in memory.
    pub entry_count: u64,
    /// Tile lookups served from memory.
    pub hit_count: u64,
    /// Tile lookups that mapped a file from disk.
    pub miss_count: u64,
    /// Chunk requests sent upstream.
    pub fetch_requests: u64,
    /// Unit tiles transferred from upstream.
    pub tiles_downloaded: u64,
    /// Chunks split after a tile-limit refusal.
    pub subdivisions: u64,
    /// Adaptive samples answered by the High product.
    pub high_samples: u64,
    /// Adaptive samples that fell back to Standard.
    pub standard_fallbacks: u64,
    /// Samples with no data in any product.
    pub absent_samples: u64,
    /// Adaptive requests whose High coverage could not be obtained.
    pub high_failures: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetch_requests: AtomicU64,
    tiles_downloaded: AtomicU64,
    subdivisions: AtomicU64,
    high_samples: AtomicU64,
    standard_fallbacks: AtomicU64,
    absent_samples: AtomicU64,
    high_failures: AtomicU64,
}

fn bump(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

/// Opaque reference to cached coverage of a bounding box.
///
/// Cheap to clone. Only meaningful to the [`ElevationCache`] that issued it.
#[derive(Debug, Clone)]
pub struct TileHandle {
    inner: HandleInner,
}

#[derive(Debug, Clone)]
enum HandleInner {
    Single(Arc<Mosaic>),
    Adaptive {
        high: Option<Arc<Mosaic>>,
        standard: Arc<Mosaic>,
    },
}

impl TileHandle {
    pub fn product(&self) -> ResolutionProduct {
        match &self.inner {
            HandleInner::Single(mosaic) => mosaic.product(),
            HandleInner::Adaptive { .. } => ResolutionProduct::Adaptive,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        match &self.inner {
            HandleInner::Single(mosaic) => mosaic.bounds(),
            HandleInner::Adaptive { standard, .. } => standard.bounds(),
        }
    }

    /// Whether an Adaptive handle obtained High coverage. Concrete handles
    /// report whether they are themselves High.
    pub fn has_high(&self) -> bool {
        match &self.inner {
            HandleInner::Single(mosaic) => mosaic.product() == ResolutionProduct::High,
            HandleInner::Adaptive { high, .. } => high.is_some(),
        }
    }
}

type HandleKey = (ResolutionProduct, [u64; 4]);

fn handle_key(product: ResolutionProduct, bounds: &BoundingBox) -> HandleKey {
    (
        product,
        [
            bounds.min_lat.to_bits(),
            bounds.min_lon.to_bits(),
            bounds.max_lat.to_bits(),
            bounds.max_lon.to_bits(),
        ],
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Terrain cache backed by a directory and an optional upstream source.
pub struct ElevationCache {
    cache_dir: PathBuf,
    source: Option<Box<dyn TileSource>>,
    default_product: ResolutionProduct,
    chunk_size_deg: f64,
    max_subdivision_depth: u32,
    tile_cache: Cache<(ResolutionProduct, TileKey), Arc<UnitTile>>,
    handles: Mutex<HashMap<HandleKey, Arc<Mosaic>>>,
    /// Boxes whose High coverage already failed during this cache's lifetime.
    high_unavailable: Mutex<HashSet<HandleKey>>,
    high_population: Mutex<()>,
    standard_population: Mutex<()>,
    counters: Counters,
}

impl ElevationCache {
    pub fn builder<P: AsRef<Path>>(cache_dir: P) -> ElevationCacheBuilder {
        ElevationCacheBuilder::new(cache_dir)
    }

    /// Make sure terrain for `bounds` is on disk and return a handle to it.
    ///
    /// Already-covered boxes (open handles, or boxes inside a manifest entry)
    /// return without contacting the upstream. For
    /// [`ResolutionProduct::Adaptive`] a High failure is logged and counted;
    /// Standard coverage is always required.
    ///
    /// # Errors
    ///
    /// - [`ViewshedError::InvalidInput`] for malformed bounds
    /// - [`ViewshedError::CoverageUnavailable`] when terrain cannot be obtained
    /// - [`ViewshedError::Timeout`] when the upstream stops responding
    pub fn ensure_coverage(
        &self,
        bounds: &BoundingBox,
        product: ResolutionProduct,
    ) -> Result<TileHandle> {
        bounds.validate()?;

        let inner = match product {
            ResolutionProduct::Adaptive => {
                let high_key = handle_key(ResolutionProduct::High, bounds);
                let known_missing = lock(&self.high_unavailable).contains(&high_key);
                let high = if known_missing {
                    None
                } else {
                    match self.ensure_tier(bounds, ResolutionProduct::High) {
                        Ok(mosaic) => Some(mosaic),
                        Err(e) => {
                            bump(&self.counters.high_failures, 1);
                            lock(&self.high_unavailable).insert(high_key);
                            tracing::warn!(
                                %bounds,
                                error = %e,
                                "high resolution coverage unavailable, using standard"
                            );
                            None
                        }
                    }
                };
                let standard = self.ensure_tier(bounds, ResolutionProduct::Standard)?;
                HandleInner::Adaptive { high, standard }
            }
            concrete => HandleInner::Single(self.ensure_tier(bounds, concrete)?),
        };
        Ok(TileHandle { inner })
    }

    fn ensure_tier(&self, bounds: &BoundingBox, product: ResolutionProduct) -> Result<Arc<Mosaic>> {
        let key = handle_key(product, bounds);
        if let Some(mosaic) = lock(&self.handles).get(&key) {
            return Ok(Arc::clone(mosaic));
        }

        let _population = lock(self.population_lock(product));
        // Another thread may have finished this box while we waited
        if let Some(mosaic) = lock(&self.handles).get(&key) {
            return Ok(Arc::clone(mosaic));
        }

        let mut manifest = Manifest::load(self.manifest_path(product))?;
        let mosaic = match manifest.covering(bounds) {
            Some(entry) => {
                let wanted = bounds.unit_tiles();
                let tiles: Vec<TileKey> = entry
                    .tiles
                    .iter()
                    .copied()
                    .filter(|k| wanted.contains(k))
                    .collect();
                if tiles.is_empty() {
                    return Err(ViewshedError::CoverageUnavailable {
                        product,
                        bounds: *bounds,
                        reason: format!("{} is recorded as having no upstream data", entry.bounds),
                    });
                }
                tracing::debug!(
                    %product,
                    %bounds,
                    covered_by = %entry.bounds,
                    "coverage found in manifest"
                );
                Mosaic::new(product, *bounds, tiles)
            }
            None => {
                let outcome = self.populate(bounds, product)?;
                if outcome.available.is_empty() {
                    let missing = outcome.missing.len();
                    // A High box without data is recorded; later processes skip it
                    if product == ResolutionProduct::High {
                        manifest.record(product, *bounds, Vec::new(), outcome.missing);
                        manifest.save()?;
                    }
                    return Err(ViewshedError::CoverageUnavailable {
                        product,
                        bounds: *bounds,
                        reason: format!("upstream has no data for any of {} unit tiles", missing),
                    });
                }
                let tiles = outcome.available.clone();
                manifest.record(product, *bounds, outcome.available, outcome.missing);
                manifest.save()?;
                tracing::info!(%product, %bounds, tiles = tiles.len(), "coverage ensured");
                Mosaic::new(product, *bounds, tiles)
            }
        };

        let mosaic = Arc::new(mosaic);
        lock(&self.handles).insert(key, Arc::clone(&mosaic));
        Ok(mosaic)
    }

    /// Download every unit tile of `bounds` as a worklist of chunks.
    fn populate(&self, bounds: &BoundingBox, product: ResolutionProduct) -> Result<FetchOutcome> {
        let unavailable = |reason: String| ViewshedError::CoverageUnavailable {
            product,
            bounds: *bounds,
            reason,
        };
        let source = self.source.as_deref().ok_or_else(|| {
            unavailable("no tile source configured and the manifest does not cover this box".into())
        })?;

        let dest_dir = self.tiles_dir(product);
        let mut work: VecDeque<(BoundingBox, u32)> = bounds
            .partition(self.chunk_size_deg)
            .into_iter()
            .map(|chunk| (chunk, 0))
            .collect();
        let mut outcome = FetchOutcome::default();

        while let Some((chunk, depth)) = work.pop_front() {
            bump(&self.counters.fetch_requests, 1);
            let request = FetchRequest {
                bounds: chunk,
                product,
                dest_dir: &dest_dir,
            };

            match source.fetch(&request) {
                Ok(part) => {
                    bump(&self.counters.tiles_downloaded, part.downloaded);
                    outcome.merge(part);
                }
                Err(ViewshedError::TileLimitExceeded { requested, limit }) => {
                    if depth >= self.max_subdivision_depth || requested <= 1 {
                        return Err(unavailable(format!(
                            "chunk {} spans {} tiles, upstream limit is {} (depth {})",
                            chunk, requested, limit, depth
                        )));
                    }
                    bump(&self.counters.subdivisions, 1);
                    tracing::debug!(%chunk, requested, limit, depth, "splitting chunk");
                    work.extend(chunk.quadrants().into_iter().map(|q| (q, depth + 1)));
                }
                Err(e @ ViewshedError::Timeout { .. }) => return Err(e),
                Err(e) => {
                    return Err(unavailable(format!("{} failed: {}", source.name(), e)));
                }
            }
        }
        Ok(outcome)
    }

    /// Elevation at a single point, using the default product.
    ///
    /// Coverage is ensured for the whole unit tile cell around the point, so
    /// repeated queries nearby reuse one handle. Never fails: anything that
    /// prevents an answer yields [`Elevation::Absent`].
    pub fn get_elevation(&self, point: &GeoPoint) -> Elevation {
        if point.validate().is_err() {
            return Elevation::Absent;
        }
        let lat = point.lat.floor().min(89.0);
        let lon = point.lon.floor().min(179.0);
        let bounds = BoundingBox::new(lat, lon, lat + 1.0, lon + 1.0);
        match self.ensure_coverage(&bounds, self.default_product) {
            Ok(handle) => self.sample(point, &handle),
            Err(e) => {
                tracing::debug!(%point, error = %e, "point query without coverage");
                Elevation::Absent
            }
        }
    }

    /// Elevation at one point inside `handle`'s coverage.
    pub fn sample(&self, point: &GeoPoint, handle: &TileHandle) -> Elevation {
        self.get_elevations_batch(std::slice::from_ref(point), handle)
            .pop()
            .unwrap_or(Elevation::Absent)
    }

    /// Elevations for many points against one handle, in input order.
    ///
    /// Adaptive handles try High first and fall back to Standard per point.
    pub fn get_elevations_batch(&self, points: &[GeoPoint], handle: &TileHandle) -> Vec<Elevation> {
        let results = match &handle.inner {
            HandleInner::Single(mosaic) => self.sample_mosaic(mosaic, points),
            HandleInner::Adaptive { high, standard } => {
                let mut results = vec![Elevation::Absent; points.len()];
                for &tier in ResolutionProduct::Adaptive.tiers() {
                    let mosaic = match tier {
                        ResolutionProduct::High => high.as_deref(),
                        _ => Some(&**standard),
                    };
                    if let Some(mosaic) = mosaic {
                        self.fill_absent(mosaic, points, &mut results);
                    }
                    if tier == ResolutionProduct::High {
                        let answered = results.iter().filter(|e| !e.is_absent()).count();
                        bump(&self.counters.high_samples, answered);
                        bump(&self.counters.standard_fallbacks, points.len() - answered);
                    }
                }
                results
            }
        };

        bump(
            &self.counters.absent_samples,
            results.iter().filter(|e| e.is_absent()).count(),
        );
        results
    }

    /// Sample `mosaic` only for the points still absent in `results`.
    fn fill_absent(&self, mosaic: &Mosaic, points: &[GeoPoint], results: &mut [Elevation]) {
        let pending: Vec<usize> = (0..points.len())
            .filter(|&i| results[i].is_absent())
            .collect();
        if pending.is_empty() {
            return;
        }
        let retry: Vec<GeoPoint> = pending.iter().map(|&i| points[i]).collect();
        for (i, value) in pending.into_iter().zip(self.sample_mosaic(mosaic, &retry)) {
            results[i] = results[i].or_else(|| value);
        }
    }

    /// Groups points by unit tile so each tile is looked up once.
    fn sample_mosaic(&self, mosaic: &Mosaic, points: &[GeoPoint]) -> Vec<Elevation> {
        let mut results = vec![Elevation::Absent; points.len()];

        let mut groups: HashMap<TileKey, Vec<usize>> = HashMap::new();
        for (i, point) in points.iter().enumerate() {
            if let Some(key) = mosaic.tile_for(point) {
                groups.entry(key).or_default().push(i);
            }
        }

        for (key, indices) in &groups {
            let tile = match self.load_tile(mosaic.product(), *key) {
                Ok(tile) => tile,
                Err(e) => {
                    tracing::warn!(tile = %key, error = %e, "cached tile unreadable");
                    continue;
                }
            };
            for &i in indices {
                results[i] = tile.sample(points[i].lat, points[i].lon);
            }
        }
        results
    }

    fn load_tile(&self, product: ResolutionProduct, key: TileKey) -> Result<Arc<UnitTile>> {
        if let Some(tile) = self.tile_cache.get(&(product, key)) {
            bump(&self.counters.hits, 1);
            return Ok(tile);
        }
        bump(&self.counters.misses, 1);

        let path = self.tiles_dir(product).join(key.filename());
        let tile = Arc::new(UnitTile::open(&path, key)?);
        self.tile_cache.insert((product, key), Arc::clone(&tile));
        Ok(tile)
    }

    /// Recorded coverage for a concrete product.
    pub fn coverage_entries(&self, product: ResolutionProduct) -> Result<Vec<ManifestEntry>> {
        Ok(Manifest::load(self.manifest_path(product))?.entries)
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            entry_count: self.tile_cache.entry_count(),
            hit_count: load(&c.hits),
            miss_count: load(&c.misses),
            fetch_requests: load(&c.fetch_requests),
            tiles_downloaded: load(&c.tiles_downloaded),
            subdivisions: load(&c.subdivisions),
            high_samples: load(&c.high_samples),
            standard_fallbacks: load(&c.standard_fallbacks),
            absent_samples: load(&c.absent_samples),
            high_failures: load(&c.high_failures),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Whether an upstream source is configured.
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Drop every open handle and in-memory tile. Files on disk are kept.
    pub fn close(&self) {
        let open = {
            let mut handles = lock(&self.handles);
            let open = handles.len();
            handles.clear();
            open
        };
        lock(&self.high_unavailable).clear();
        self.tile_cache.invalidate_all();
        tracing::debug!(
            cache_dir = %self.cache_dir.display(),
            handles = open,
            "elevation cache closed"
        );
    }

    fn tiles_dir(&self, product: ResolutionProduct) -> PathBuf {
        self.cache_dir.join(product.dir_name()).join("tiles")
    }

    fn manifest_path(&self, product: ResolutionProduct) -> PathBuf {
        self.cache_dir.join(product.dir_name()).join("manifest.json")
    }

    fn population_lock(&self, product: ResolutionProduct) -> &Mutex<()> {
        match product {
            ResolutionProduct::High => &self.high_population,
            _ => &self.standard_population,
        }
    }
}

impl Drop for ElevationCache {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for [`ElevationCache`].
///
/// # Example
///
/// ```ignore
/// use viewshed::ElevationCacheBuilder;
///
/// let cache = ElevationCacheBuilder::new("/data/viewshed")
///     .tile_cache_size(50)
///     .chunk_size_deg(1.0)
///     .mirror_dir("/mnt/srtm")
///     .build()?;
/// ```
pub struct ElevationCacheBuilder {
    cache_dir: PathBuf,
    tile_cache_size: u64,
    chunk_size_deg: f64,
    max_subdivision_depth: u32,
    default_product: ResolutionProduct,
    max_tiles_per_request: usize,
    source: Option<Box<dyn TileSource>>,
    mirror_dir: Option<PathBuf>,
    #[cfg(feature = "download")]
    download_config: Option<DownloadConfig>,
}

impl ElevationCacheBuilder {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            tile_cache_size: DEFAULT_TILE_CACHE_SIZE,
            chunk_size_deg: DEFAULT_CHUNK_DEG,
            max_subdivision_depth: DEFAULT_MAX_SUBDIVISION_DEPTH,
            default_product: ResolutionProduct::default(),
            max_tiles_per_request: DEFAULT_MAX_TILES_PER_REQUEST,
            source: None,
            mirror_dir: None,
            #[cfg(feature = "download")]
            download_config: None,
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `VIEWSHED_CACHE_DIR` | Cache directory | Required |
    /// | `VIEWSHED_TILE_CACHE_SIZE` | Unit tiles kept in memory | 100 |
    /// | `VIEWSHED_CHUNK_DEG` | Download chunk edge in degrees | 2.0 |
    /// | `VIEWSHED_MAX_SUBDIVISION_DEPTH` | Chunk split depth cap | 4 |
    /// | `VIEWSHED_PRODUCT` | `high`, `standard` or `adaptive` | standard |
    /// | `VIEWSHED_MIRROR_DIR` | Local mirror directory | None |
    /// | `VIEWSHED_MAX_TILES_PER_REQUEST` | Upstream tile cap | 9 |
    /// | `VIEWSHED_DOWNLOAD_SOURCE` | Named source: `ardupilot`* | None |
    /// | `VIEWSHED_DOWNLOAD_URL` | URL template* | None |
    /// | `VIEWSHED_TIMEOUT_SECS` | HTTP timeout* | 300 |
    ///
    /// *Only used when the `download` feature is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if `VIEWSHED_CACHE_DIR` is not set.
    pub fn from_env() -> Result<Self> {
        let cache_dir = std::env::var("VIEWSHED_CACHE_DIR").map_err(|_| {
            ViewshedError::invalid_input("VIEWSHED_CACHE_DIR environment variable not set")
        })?;

        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.parse().ok())
        }

        let mut builder = Self::new(cache_dir);
        if let Some(size) = parsed("VIEWSHED_TILE_CACHE_SIZE") {
            builder.tile_cache_size = size;
        }
        if let Some(deg) = parsed("VIEWSHED_CHUNK_DEG") {
            builder.chunk_size_deg = deg;
        }
        if let Some(depth) = parsed("VIEWSHED_MAX_SUBDIVISION_DEPTH") {
            builder.max_subdivision_depth = depth;
        }
        if let Some(product) = parsed("VIEWSHED_PRODUCT") {
            builder.default_product = product;
        }
        if let Some(limit) = parsed("VIEWSHED_MAX_TILES_PER_REQUEST") {
            builder.max_tiles_per_request = limit;
        }
        builder.mirror_dir = std::env::var("VIEWSHED_MIRROR_DIR").ok().map(PathBuf::from);

        #[cfg(feature = "download")]
        {
            let named = std::env::var("VIEWSHED_DOWNLOAD_SOURCE")
                .ok()
                .filter(|s| s.eq_ignore_ascii_case("ardupilot"))
                .map(|_| DownloadConfig::ardupilot());
            let config = named.or_else(|| {
                std::env::var("VIEWSHED_DOWNLOAD_URL")
                    .ok()
                    .map(DownloadConfig::with_url_template)
            });
            builder.download_config = config.map(|config| match parsed("VIEWSHED_TIMEOUT_SECS") {
                Some(secs) => config.with_timeout(secs),
                None => config,
            });
        }

        Ok(builder)
    }

    pub fn cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Maximum unit tiles held in memory. Default is 100.
    pub fn tile_cache_size(mut self, size: u64) -> Self {
        self.tile_cache_size = size;
        self
    }

    /// Edge of the download chunk grid, in degrees. Default is 2.0.
    pub fn chunk_size_deg(mut self, degrees: f64) -> Self {
        self.chunk_size_deg = degrees;
        self
    }

    pub fn max_subdivision_depth(mut self, depth: u32) -> Self {
        self.max_subdivision_depth = depth;
        self
    }

    /// Product used by [`ElevationCache::get_elevation`].
    pub fn default_product(mut self, product: ResolutionProduct) -> Self {
        self.default_product = product;
        self
    }

    /// Tile cap applied to sources created by this builder.
    pub fn max_tiles_per_request(mut self, limit: usize) -> Self {
        self.max_tiles_per_request = limit;
        self
    }

    /// Use a custom upstream. Takes precedence over mirror and download settings.
    pub fn source(mut self, source: impl TileSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Populate from a local mirror directory.
    pub fn mirror_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.mirror_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Populate over HTTP. Takes precedence over a mirror directory.
    #[cfg(feature = "download")]
    pub fn auto_download(mut self, config: DownloadConfig) -> Self {
        self.download_config = Some(config);
        self
    }

    /// Build the [`ElevationCache`].
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are out of range, the cache directory
    /// cannot be created, or the HTTP client cannot be initialised.
    pub fn build(self) -> Result<ElevationCache> {
        if !self.chunk_size_deg.is_finite() || self.chunk_size_deg <= 0.0 {
            return Err(ViewshedError::invalid_input(format!(
                "chunk size {} must be a positive number of degrees",
                self.chunk_size_deg
            )));
        }
        std::fs::create_dir_all(&self.cache_dir)?;

        let source = match self.source {
            Some(source) => Some(source),
            None => self.configured_source()?,
        };
        if let Some(source) = &source {
            tracing::debug!(
                source = source.name(),
                cache_dir = %self.cache_dir.display(),
                "elevation cache ready"
            );
        }

        Ok(ElevationCache {
            cache_dir: self.cache_dir,
            source,
            default_product: self.default_product,
            chunk_size_deg: self.chunk_size_deg,
            max_subdivision_depth: self.max_subdivision_depth,
            tile_cache: Cache::builder().max_capacity(self.tile_cache_size).build(),
            handles: Mutex::new(HashMap::new()),
            high_unavailable: Mutex::new(HashSet::new()),
            high_population: Mutex::new(()),
            standard_population: Mutex::new(()),
            counters: Counters::default(),
        })
    }

    fn configured_source(&self) -> Result<Option<Box<dyn TileSource>>> {
        #[cfg(feature = "download")]
        {
            if let Some(config) = &self.download_config {
                let config = config
                    .clone()
                    .with_max_tiles_per_request(self.max_tiles_per_request);
                return Ok(Some(Box::new(HttpTileSource::new(config)?)));
            }
        }

        let limit = self.max_tiles_per_request;
        Ok(self.mirror_dir.as_ref().map(|dir| {
            Box::new(DirectoryTileSource::new(dir).with_max_tiles_per_request(limit))
                as Box<dyn TileSource>
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::SRTM3_SIZE;
    use std::fs;
    use tempfile::TempDir;

    /// SRTM3 tile with the given value at its center sample
    fn create_test_tile(dir: &Path, filename: &str, center_elevation: i16) {
        let mut data = vec![0u8; SRTM3_SIZE];
        let offset = (600 * 1201 + 600) * 2;
        data[offset..offset + 2].copy_from_slice(&center_elevation.to_be_bytes());
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(filename), data).unwrap();
    }

    fn mirror(tiles: &[(&str, i16)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, center) in tiles {
            create_test_tile(&dir.path().join("SRTM3"), name, *center);
        }
        dir
    }

    #[test]
    fn test_ensure_and_sample() {
        let mirror = mirror(&[("N35E138.hgt", 500)]);
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path())
            .mirror_dir(mirror.path())
            .build()
            .unwrap();

        let bounds = BoundingBox::new(35.2, 138.2, 35.8, 138.8);
        let handle = cache
            .ensure_coverage(&bounds, ResolutionProduct::Standard)
            .unwrap();
        assert_eq!(handle.product(), ResolutionProduct::Standard);

        let values = cache.get_elevations_batch(
            &[GeoPoint::new(35.5, 138.5), GeoPoint::new(35.3, 138.3)],
            &handle,
        );
        assert_eq!(values, vec![Elevation::Meters(500.0), Elevation::Meters(0.0)]);

        assert!(cache_dir.path().join("SRTM3/tiles/N35E138.hgt").exists());
        assert!(cache_dir.path().join("SRTM3/manifest.json").exists());
    }

    #[test]
    fn test_repeat_ensure_is_download_free() {
        let mirror = mirror(&[("N35E138.hgt", 500)]);
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path())
            .mirror_dir(mirror.path())
            .build()
            .unwrap();

        let bounds = BoundingBox::new(35.2, 138.2, 35.8, 138.8);
        cache.ensure_coverage(&bounds, ResolutionProduct::Standard).unwrap();
        let after_first = cache.stats();
        assert_eq!(after_first.fetch_requests, 1);
        assert_eq!(after_first.tiles_downloaded, 1);

        cache.ensure_coverage(&bounds, ResolutionProduct::Standard).unwrap();
        // A smaller box inside the recorded one is served from the manifest
        let inner = BoundingBox::new(35.3, 138.3, 35.4, 138.4);
        cache.ensure_coverage(&inner, ResolutionProduct::Standard).unwrap();

        assert_eq!(cache.stats().fetch_requests, 1);
    }

    #[test]
    fn test_close_keeps_disk_state() {
        let mirror = mirror(&[("N35E138.hgt", 500)]);
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path())
            .mirror_dir(mirror.path())
            .build()
            .unwrap();

        let bounds = BoundingBox::new(35.2, 138.2, 35.8, 138.8);
        cache.ensure_coverage(&bounds, ResolutionProduct::Standard).unwrap();
        cache.close();

        assert!(cache_dir.path().join("SRTM3/tiles/N35E138.hgt").exists());
        let handle = cache
            .ensure_coverage(&bounds, ResolutionProduct::Standard)
            .unwrap();
        assert_eq!(cache.stats().fetch_requests, 1);
        assert_eq!(
            cache.get_elevations_batch(&[GeoPoint::new(35.5, 138.5)], &handle),
            vec![Elevation::Meters(500.0)]
        );
    }

    #[test]
    fn test_no_source_and_no_manifest() {
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path()).build().unwrap();

        let err = cache
            .ensure_coverage(
                &BoundingBox::new(35.2, 138.2, 35.8, 138.8),
                ResolutionProduct::Standard,
            )
            .unwrap_err();
        assert!(err.is_coverage_failure());
        assert!(!cache.has_source());
    }

    #[test]
    fn test_ocean_only_box_is_unavailable() {
        let mirror = mirror(&[]);
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path())
            .mirror_dir(mirror.path())
            .build()
            .unwrap();

        let err = cache
            .ensure_coverage(
                &BoundingBox::new(0.2, -150.8, 0.8, -150.2),
                ResolutionProduct::Standard,
            )
            .unwrap_err();
        assert!(matches!(err, ViewshedError::CoverageUnavailable { .. }));
        // Nothing recorded for a failed population
        assert!(cache
            .coverage_entries(ResolutionProduct::Standard)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_bounds_rejected_before_fetch() {
        let mirror = mirror(&[("N35E138.hgt", 500)]);
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path())
            .mirror_dir(mirror.path())
            .build()
            .unwrap();

        let err = cache
            .ensure_coverage(
                &BoundingBox::new(36.0, 138.0, 35.0, 139.0),
                ResolutionProduct::Standard,
            )
            .unwrap_err();
        assert!(matches!(err, ViewshedError::InvalidInput { .. }));
        assert_eq!(cache.stats().fetch_requests, 0);
    }

    #[test]
    fn test_adaptive_falls_back_to_standard() {
        let mirror = mirror(&[("N35E138.hgt", 500)]);
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path())
            .mirror_dir(mirror.path())
            .build()
            .unwrap();

        let bounds = BoundingBox::new(35.2, 138.2, 35.8, 138.8);
        let handle = cache
            .ensure_coverage(&bounds, ResolutionProduct::Adaptive)
            .unwrap();
        assert_eq!(handle.product(), ResolutionProduct::Adaptive);
        assert!(!handle.has_high());

        let value = cache.sample(&GeoPoint::new(35.5, 138.5), &handle);
        assert_eq!(value, Elevation::Meters(500.0));

        let stats = cache.stats();
        assert_eq!(stats.high_failures, 1);
        assert_eq!(stats.standard_fallbacks, 1);
        assert_eq!(stats.high_samples, 0);
    }

    #[test]
    fn test_point_query() {
        let mirror = mirror(&[("N35E138.hgt", 500)]);
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path())
            .mirror_dir(mirror.path())
            .build()
            .unwrap();

        assert_eq!(
            cache.get_elevation(&GeoPoint::new(35.5, 138.5)),
            Elevation::Meters(500.0)
        );
        // Tile not in the mirror
        assert_eq!(cache.get_elevation(&GeoPoint::new(10.5, 10.5)), Elevation::Absent);
        assert_eq!(cache.get_elevation(&GeoPoint::new(95.0, 0.0)), Elevation::Absent);
    }

    #[test]
    fn test_tile_cache_hits() {
        let mirror = mirror(&[("N35E138.hgt", 500)]);
        let cache_dir = TempDir::new().unwrap();
        let cache = ElevationCacheBuilder::new(cache_dir.path())
            .mirror_dir(mirror.path())
            .build()
            .unwrap();

        let bounds = BoundingBox::new(35.2, 138.2, 35.8, 138.8);
        let handle = cache
            .ensure_coverage(&bounds, ResolutionProduct::Standard)
            .unwrap();
        cache.sample(&GeoPoint::new(35.5, 138.5), &handle);
        cache.sample(&GeoPoint::new(35.6, 138.6), &handle);

        let stats = cache.stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_chunk_size() {
        let cache_dir = TempDir::new().unwrap();
        let result = ElevationCacheBuilder::new(cache_dir.path())
            .chunk_size_deg(0.0)
            .build();
        assert!(matches!(result, Err(ViewshedError::InvalidInput { .. })));
    }

    #[test]
    fn test_from_env() {
        let cache_dir = TempDir::new().unwrap();
        let vars = [
            "VIEWSHED_CACHE_DIR",
            "VIEWSHED_TILE_CACHE_SIZE",
            "VIEWSHED_PRODUCT",
        ];
        let saved: Vec<Option<String>> = vars.iter().map(|v| std::env::var(v).ok()).collect();

        std::env::remove_var("VIEWSHED_CACHE_DIR");
        assert!(ElevationCacheBuilder::from_env().is_err());

        std::env::set_var("VIEWSHED_CACHE_DIR", cache_dir.path());
        std::env::set_var("VIEWSHED_TILE_CACHE_SIZE", "50");
        std::env::set_var("VIEWSHED_PRODUCT", "adaptive");
        let builder = ElevationCacheBuilder::from_env().unwrap();
        assert_eq!(builder.tile_cache_size, 50);
        assert_eq!(builder.default_product, ResolutionProduct::Adaptive);
        assert_eq!(builder.cache_dir, cache_dir.path());

        for (name, value) in vars.iter().zip(saved) {
            match value {
                Some(v) => std::env::set_var(name, v),
                None => std::env::remove_var(name),
            }
        }
    }
}
