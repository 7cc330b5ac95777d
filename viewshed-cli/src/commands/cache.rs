use anyhow::{Context, Result};
use viewshed::{BoundingBox, ResolutionProduct};

use super::CacheOptions;

pub fn ensure(
    options: &CacheOptions,
    bounds: BoundingBox,
    product: ResolutionProduct,
) -> Result<()> {
    let cache = options.open(product)?;
    let handle = cache
        .ensure_coverage(&bounds, product)
        .with_context(|| format!("Failed to ensure {} coverage for {}", product, bounds))?;

    let stats = cache.stats();
    println!("Coverage ready:   {} ({})", handle.bounds(), handle.product());
    if product == ResolutionProduct::Adaptive {
        let high = if handle.has_high() { "available" } else { "unavailable" };
        println!("High resolution:  {}", high);
    }
    println!("Upstream fetches: {}", stats.fetch_requests);
    println!("Tiles downloaded: {}", stats.tiles_downloaded);
    println!("Subdivisions:     {}", stats.subdivisions);
    Ok(())
}

pub fn list(options: &CacheOptions, product: Option<ResolutionProduct>) -> Result<()> {
    let cache = options.open(ResolutionProduct::default())?;
    let products = match product {
        Some(ResolutionProduct::Adaptive) | None => {
            vec![ResolutionProduct::High, ResolutionProduct::Standard]
        }
        Some(concrete) => vec![concrete],
    };

    println!("Cache directory: {}", cache.cache_dir().display());
    for product in products {
        let entries = cache
            .coverage_entries(product)
            .with_context(|| format!("Failed to read {} manifest", product))?;

        println!("\n{} ({} covered boxes)", product, entries.len());
        for entry in entries {
            println!(
                "  {}  {} tiles, {} without data",
                entry.bounds,
                entry.tiles.len(),
                entry.missing.len()
            );
        }
    }
    Ok(())
}
