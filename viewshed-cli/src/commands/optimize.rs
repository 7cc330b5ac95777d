use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use viewshed::geojson::optimization_feature_collection;
use viewshed::{
    optimize_coverage, BoundingBox, LosParams, OptimizationResult, OptimizeRequest,
    ResolutionProduct, RunControl,
};

use super::{progress_bar, CacheOptions};

pub struct Args {
    pub target: BoundingBox,
    pub search: BoundingBox,
    pub height: f64,
    pub target_grid: usize,
    pub search_grid: usize,
    pub top_k: usize,
    pub steps: usize,
    pub product: ResolutionProduct,
    pub margin: f64,
}

/// One CSV row per evaluated candidate.
#[derive(Serialize)]
struct CandidateRow {
    lat: f64,
    lon: f64,
    ground_elevation_m: f64,
    visible_count: usize,
    target_count: usize,
    coverage_pct: f64,
}

pub fn run(
    options: &CacheOptions,
    args: Args,
    json: bool,
    csv: Option<PathBuf>,
    geojson: Option<PathBuf>,
) -> Result<()> {
    let request = OptimizeRequest::new(args.target, args.search, args.height)
        .with_grid_sizes(args.target_grid, args.search_grid)
        .with_refinement(args.top_k, args.steps)
        .with_product(args.product)
        .with_los(LosParams::default().with_clearance_margin(args.margin));
    request.validate().context("Invalid optimization request")?;

    let cache = options.open(args.product)?;

    let pb = progress_bar()?;
    let report = |done: usize, total: usize, message: &str| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
        pb.set_message(message.to_string());
    };
    let result = optimize_coverage(&cache, &request, RunControl::new().with_progress(&report))
        .context("Optimization failed")?;
    pb.finish_and_clear();
    tracing::info!(
        evaluated = result.evaluated.len(),
        best_pct = result.best.coverage_pct,
        "optimization finished"
    );

    if let Some(path) = csv {
        write_csv(&path, &result)?;
        eprintln!("Candidates written to: {}", path.display());
    }

    if let Some(path) = geojson {
        let collection = optimization_feature_collection(&result);
        std::fs::write(&path, collection.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("GeoJSON written to: {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let best = &result.best;
        println!("Best site:        {}", best.location);
        println!("Ground elevation: {:.1}m MSL", best.ground_elevation_m);
        println!(
            "Coverage:         {} / {} targets ({:.1}%)",
            best.visible_count, best.target_count, best.coverage_pct
        );
        println!("Evaluated:        {} candidates", result.evaluated.len());
        println!("\nRefined candidates:");
        for (rank, candidate) in result.refined.iter().enumerate() {
            println!(
                "  {}. {}  {:.1}%",
                rank + 1,
                candidate.location,
                candidate.coverage_pct
            );
        }
    }

    Ok(())
}

fn write_csv(path: &Path, result: &OptimizationResult) -> Result<()> {
    let file = File::create(path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for candidate in &result.evaluated {
        writer.serialize(CandidateRow {
            lat: candidate.location.lat,
            lon: candidate.location.lon,
            ground_elevation_m: candidate.ground_elevation_m,
            visible_count: candidate.visible_count,
            target_count: candidate.target_count,
            coverage_pct: candidate.coverage_pct,
        })?;
    }
    writer.flush()?;
    Ok(())
}
