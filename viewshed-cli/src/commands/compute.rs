use anyhow::{Context, Result};
use std::path::PathBuf;
use viewshed::geojson::viewshed_feature_collection;
use viewshed::{
    compute_viewshed, GeoPoint, LosParams, ResolutionProduct, RunControl, ViewshedRequest,
};

use super::{progress_bar, CacheOptions};

pub struct Args {
    pub lat: f64,
    pub lon: f64,
    pub height: f64,
    pub radius: f64,
    pub grid_points: usize,
    pub product: ResolutionProduct,
    pub margin: f64,
}

pub fn run(options: &CacheOptions, args: Args, json: bool, geojson: Option<PathBuf>) -> Result<()> {
    let request = ViewshedRequest::new(
        GeoPoint::new(args.lat, args.lon),
        args.height,
        args.radius,
        args.grid_points,
    )
    .with_product(args.product)
    .with_los(LosParams::default().with_clearance_margin(args.margin));
    request.validate().context("Invalid viewshed request")?;

    let cache = options.open(args.product)?;

    let pb = progress_bar()?;
    let report = |done: usize, total: usize, message: &str| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
        pb.set_message(message.to_string());
    };
    let result = compute_viewshed(&cache, &request, RunControl::new().with_progress(&report))
        .context("Viewshed computation failed")?;
    pb.finish_and_clear();
    tracing::info!(
        visible = result.visible.len(),
        blocked = result.blocked.len(),
        "viewshed computed"
    );

    if let Some(path) = geojson {
        let collection = viewshed_feature_collection(&result);
        std::fs::write(&path, collection.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("GeoJSON written to: {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let observer = &result.observer;
        println!("Observer:          {}", observer.location);
        println!("Ground elevation:  {:.1}m MSL", observer.ground_elevation_m);
        println!(
            "Antenna:           {:.1}m AGL ({:.1}m MSL)",
            observer.antenna_agl_m,
            observer.antenna_msl_m()
        );
        println!(
            "Grid:              {0}x{0}, {1:.3} km spacing",
            result.grid_points,
            result.grid_spacing_km()
        );
        println!(
            "Visible:           {} / {} ({:.1}%)",
            result.visible.len(),
            result.tested_count(),
            result.visibility_pct()
        );
        println!("Max visible range: {:.2} km", result.max_visible_range_km);
    }

    Ok(())
}
