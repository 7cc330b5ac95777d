//! HTTP tile source.
//!
//! Only available with the `download` feature.
//!
//! # Data Sources
//!
//! - **ArduPilot Terrain Server**: free access. SRTM1 tiles live in a flat
//!   directory, SRTM3 tiles under continent subdirectories.
//! - **Custom**: any server reachable through a URL template.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::elevation::ResolutionProduct;
use crate::error::{Result, ViewshedError};
use crate::source::{
    check_tile_bytes, extract_hgt_from_zip, write_atomic, TileFetch, TileSource,
    DEFAULT_MAX_TILES_PER_REQUEST,
};
use crate::tile::TileKey;

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

const ARDUPILOT_BASE_URL: &str = "https://terrain.ardupilot.org";

/// Compression format of downloaded tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Raw `.hgt`
    #[default]
    None,
    /// `.hgt.gz`
    Gzip,
    /// `.hgt.zip`
    Zip,
}

impl Compression {
    /// Detect compression format from a URL or filename extension.
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.ends_with(".gz") {
            Compression::Gzip
        } else if lower.ends_with(".zip") {
            Compression::Zip
        } else {
            Compression::None
        }
    }
}

/// Where tiles are downloaded from.
#[derive(Debug, Clone)]
pub enum DownloadSource {
    /// ArduPilot terrain server, product chosen per request.
    ArduPilot,

    /// Custom URL template.
    ///
    /// Placeholders: `{filename}` (e.g. `N35E138`), `{lat_prefix}`, `{lat}`,
    /// `{lon_prefix}`, `{lon}`, `{continent}` (ArduPilot-style) and
    /// `{product}` (`SRTM1` or `SRTM3`).
    Custom {
        url_template: String,
        compression: Compression,
    },
}

/// Configuration for [`HttpTileSource`].
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub source: DownloadSource,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry attempts after the first failure.
    pub max_retries: u32,
    /// Unit tiles allowed in one request.
    pub max_tiles_per_request: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self::ardupilot()
    }
}

impl DownloadConfig {
    pub fn ardupilot() -> Self {
        Self {
            source: DownloadSource::ArduPilot,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 3,
            max_tiles_per_request: DEFAULT_MAX_TILES_PER_REQUEST,
        }
    }

    /// Custom URL template; compression is detected from its extension.
    ///
    /// ```ignore
    /// use viewshed::download::DownloadConfig;
    ///
    /// let config = DownloadConfig::with_url_template(
    ///     "https://example.com/{product}/{filename}.hgt.gz",
    /// );
    /// ```
    pub fn with_url_template(url_template: impl Into<String>) -> Self {
        let url_template = url_template.into();
        let compression = Compression::from_url(&url_template);
        Self {
            source: DownloadSource::Custom {
                url_template,
                compression,
            },
            ..Self::ardupilot()
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_tiles_per_request(mut self, limit: usize) -> Self {
        self.max_tiles_per_request = limit;
        self
    }

    fn compression(&self) -> Compression {
        match &self.source {
            DownloadSource::ArduPilot => Compression::Zip,
            DownloadSource::Custom { compression, .. } => *compression,
        }
    }
}

/// Downloads unit tiles over HTTP.
pub struct HttpTileSource {
    client: Client,
    config: DownloadConfig,
}

impl HttpTileSource {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ViewshedError::DownloadFailed {
                filename: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// Build the download URL for a tile.
    fn build_url(&self, key: TileKey, product: ResolutionProduct) -> Result<String> {
        let base_name = key.to_string();
        let continent = || coords_to_continent(key.lat as f64, key.lon as f64);

        match &self.config.source {
            DownloadSource::ArduPilot => match product {
                ResolutionProduct::Standard => {
                    let continent = continent().ok_or_else(|| ViewshedError::DownloadFailed {
                        filename: key.filename(),
                        reason: format!(
                            "Coordinates ({}, {}) do not map to a known continent",
                            key.lat, key.lon
                        ),
                    })?;
                    Ok(format!(
                        "{}/SRTM3/{}/{}.hgt.zip",
                        ARDUPILOT_BASE_URL, continent, base_name
                    ))
                }
                _ => Ok(format!("{}/SRTM1/{}.hgt.zip", ARDUPILOT_BASE_URL, base_name)),
            },
            DownloadSource::Custom { url_template, .. } => {
                if url_template.is_empty() {
                    return Err(ViewshedError::DownloadFailed {
                        filename: key.filename(),
                        reason: "No download URL template configured".to_string(),
                    });
                }
                let continent = if url_template.contains("{continent}") {
                    continent().unwrap_or("")
                } else {
                    ""
                };

                Ok(url_template
                    .replace("{filename}", &base_name)
                    .replace("{lat_prefix}", &base_name[0..1])
                    .replace("{lat}", &base_name[1..3])
                    .replace("{lon_prefix}", &base_name[3..4])
                    .replace("{lon}", &base_name[4..7])
                    .replace("{continent}", continent)
                    .replace("{product}", product.dir_name()))
            }
        }
    }

    /// One attempt. `Ok(None)` means the server has no such tile.
    fn try_download(&self, url: &str, filename: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.request_error(url, filename, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ViewshedError::DownloadFailed {
                filename: filename.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response
            .bytes()
            .map_err(|e| self.request_error(url, filename, e))?;

        let decompressed = match self.config.compression() {
            Compression::None => bytes.to_vec(),
            Compression::Gzip => {
                let mut data = Vec::new();
                GzDecoder::new(&bytes[..])
                    .read_to_end(&mut data)
                    .map_err(|e| ViewshedError::DownloadFailed {
                        filename: filename.to_string(),
                        reason: format!("Failed to decompress gzip: {}", e),
                    })?;
                data
            }
            Compression::Zip => extract_hgt_from_zip(&bytes, filename)?,
        };
        Ok(Some(decompressed))
    }

    fn request_error(&self, url: &str, filename: &str, e: reqwest::Error) -> ViewshedError {
        if e.is_timeout() {
            ViewshedError::Timeout {
                url: url.to_string(),
                timeout_secs: self.config.timeout_secs,
            }
        } else {
            ViewshedError::DownloadFailed {
                filename: filename.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl TileSource for HttpTileSource {
    fn name(&self) -> &str {
        match self.config.source {
            DownloadSource::ArduPilot => "ardupilot",
            DownloadSource::Custom { .. } => "http",
        }
    }

    fn max_tiles_per_request(&self) -> usize {
        self.config.max_tiles_per_request
    }

    fn fetch_tile(
        &self,
        key: TileKey,
        product: ResolutionProduct,
        dest: &Path,
    ) -> Result<TileFetch> {
        let filename = key.filename();
        let url = self.build_url(key, product)?;

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(500 * attempt as u64));
            }

            match self.try_download(&url, &filename) {
                Ok(None) => return Ok(TileFetch::NotFound),
                Ok(Some(bytes)) => {
                    check_tile_bytes(&bytes, key, product)?;
                    write_atomic(dest, &bytes)?;
                    return Ok(TileFetch::Stored);
                }
                Err(e) => {
                    tracing::warn!(%url, attempt, error = %e, "tile download attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ViewshedError::DownloadFailed {
            filename,
            reason: "Unknown error".to_string(),
        }))
    }
}

/// Map coordinates to an ArduPilot continent subdirectory.
///
/// Regions overlap; the first match in this order wins: North_America,
/// South_America, Australia, Africa, Eurasia.
pub fn coords_to_continent(lat: f64, lon: f64) -> Option<&'static str> {
    if (15.0..=60.0).contains(&lat) && (-170.0..=-50.0).contains(&lon) {
        return Some("North_America");
    }
    if (-60.0..=15.0).contains(&lat) && (-90.0..=-30.0).contains(&lon) {
        return Some("South_America");
    }
    if (-50.0..=-10.0).contains(&lat) && (110.0..=180.0).contains(&lon) {
        return Some("Australia");
    }
    if (-35.0..=35.0).contains(&lat) && (-20.0..=55.0).contains(&lon) {
        return Some("Africa");
    }
    if (0.0..=60.0).contains(&lat) && (-15.0..=180.0).contains(&lon) {
        return Some("Eurasia");
    }
    None
}
