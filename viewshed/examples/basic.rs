//! Basic example: viewshed from one antenna site.
//!
//! Run with: cargo run --example basic -- /path/to/cache /path/to/mirror

use std::env;

use viewshed::{
    compute_viewshed, ElevationCacheBuilder, GeoPoint, RunControl, ViewshedError,
    ViewshedRequest,
};

fn main() -> Result<(), ViewshedError> {
    let mut args = env::args().skip(1);
    let (cache_dir, mirror_dir) = match (args.next(), args.next()) {
        (Some(cache), Some(mirror)) => (cache, mirror),
        _ => {
            eprintln!("Usage: cargo run --example basic -- /path/to/cache /path/to/mirror");
            std::process::exit(1);
        }
    };

    let cache = ElevationCacheBuilder::new(&cache_dir)
        .mirror_dir(&mirror_dir)
        .build()?;

    // 30 m mast near Mount Fuji, 20 km radius
    let request = ViewshedRequest::new(GeoPoint::new(35.3606, 138.7274), 30.0, 20.0, 81);
    let result = compute_viewshed(&cache, &request, RunControl::new())?;

    let observer = &result.observer;
    println!("Observer: {} at {:.0}m MSL", observer.location, observer.antenna_msl_m());
    println!(
        "Visible: {} / {} ({:.1}%)",
        result.visible.len(),
        result.tested_count(),
        result.visibility_pct()
    );
    println!("Max visible range: {:.2} km", result.max_visible_range_km);

    let stats = cache.stats();
    println!("\nCache statistics:");
    println!("  Cached tiles: {}", stats.entry_count);
    println!("  Hits: {}", stats.hit_count);
    println!("  Misses: {}", stats.miss_count);
    println!("  Hit rate: {:.1}%", stats.hit_rate() * 100.0);

    Ok(())
}
