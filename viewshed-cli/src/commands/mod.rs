pub mod cache;
pub mod compute;
pub mod elevation;
pub mod optimize;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use viewshed::{
    BoundingBox, DownloadConfig, ElevationCache, ElevationCacheBuilder, ResolutionProduct,
};

const MISSING_CACHE_DIR: &str =
    "VIEWSHED_CACHE_DIR environment variable not set. Use --cache-dir or set VIEWSHED_CACHE_DIR";

/// Global flags shared by every command that touches the cache.
pub struct CacheOptions {
    pub cache_dir: Option<PathBuf>,
    pub mirror_dir: Option<PathBuf>,
    pub download: bool,
    pub download_url: Option<String>,
    pub timeout_secs: u64,
    pub tile_cache_size: u64,
}

impl CacheOptions {
    pub fn open(&self, default_product: ResolutionProduct) -> Result<ElevationCache> {
        let mut builder = match &self.cache_dir {
            Some(dir) => ElevationCacheBuilder::new(dir),
            None => ElevationCacheBuilder::from_env().context(MISSING_CACHE_DIR)?,
        };

        builder = builder
            .tile_cache_size(self.tile_cache_size)
            .default_product(default_product);

        if let Some(dir) = &self.mirror_dir {
            builder = builder.mirror_dir(dir);
        }

        if self.download {
            let config = match &self.download_url {
                Some(template) => DownloadConfig::with_url_template(template.clone()),
                None => DownloadConfig::ardupilot(),
            };
            builder = builder.auto_download(config.with_timeout(self.timeout_secs));
        }

        let cache = builder.build().context("Failed to open elevation cache")?;
        tracing::debug!(
            cache_dir = %cache.cache_dir().display(),
            upstream = cache.has_source(),
            %default_product,
            "elevation cache opened"
        );
        Ok(cache)
    }
}

/// Parse `min_lat,min_lon,max_lat,max_lon`.
pub fn parse_bounds(s: &str) -> std::result::Result<BoundingBox, String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("invalid number in '{}': {}", s, e))?;

    match values.as_slice() {
        &[min_lat, min_lon, max_lat, max_lon] => {
            let bounds = BoundingBox::new(min_lat, min_lon, max_lat, max_lon);
            bounds.validate().map_err(|e| e.to_string())?;
            Ok(bounds)
        }
        _ => Err(format!(
            "expected min_lat,min_lon,max_lat,max_lon, got {} values",
            values.len()
        )),
    }
}

pub fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}
