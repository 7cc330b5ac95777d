use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use viewshed::{BoundingBox, ResolutionProduct};

mod commands;

use commands::{parse_bounds, CacheOptions};

/// Radio line-of-sight viewsheds over SRTM terrain
#[derive(Parser)]
#[command(name = "viewshed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding downloaded tiles and coverage manifests
    #[arg(long, env = "VIEWSHED_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Local mirror of .hgt/.hgt.zip tiles (SRTM1/ and SRTM3/ subdirectories)
    #[arg(long, env = "VIEWSHED_MIRROR_DIR", global = true)]
    mirror_dir: Option<PathBuf>,

    /// Download missing tiles (ArduPilot terrain server unless --download-url is set)
    #[arg(short, long, global = true)]
    download: bool,

    /// URL template for downloads, e.g. https://example.com/{product}/{filename}.hgt.gz
    #[arg(long, env = "VIEWSHED_DOWNLOAD_URL", global = true)]
    download_url: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, env = "VIEWSHED_TIMEOUT_SECS", default_value = "300", global = true)]
    timeout: u64,

    /// Maximum unit tiles kept in memory
    #[arg(
        long,
        env = "VIEWSHED_TILE_CACHE_SIZE",
        default_value = "100",
        global = true
    )]
    tile_cache_size: u64,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the viewshed around an antenna
    Compute {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Antenna height above ground, meters
        #[arg(long, default_value = "10")]
        height: f64,

        /// Radius in km
        #[arg(long, default_value = "10")]
        radius: f64,

        /// Lattice points per axis
        #[arg(long, default_value = "51")]
        grid_points: usize,

        /// Resolution product: high, standard or adaptive
        #[arg(long, default_value = "standard")]
        product: ResolutionProduct,

        /// Terrain clearance required below the sight line, meters
        #[arg(long, default_value = "10")]
        margin: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,

        /// Write a GeoJSON FeatureCollection
        #[arg(long)]
        geojson: Option<PathBuf>,
    },

    /// Search for the antenna site covering the most of a target area
    Optimize {
        /// Target area: min_lat,min_lon,max_lat,max_lon
        #[arg(long, value_parser = parse_bounds, allow_hyphen_values = true)]
        target: BoundingBox,

        /// Area where the antenna may stand: min_lat,min_lon,max_lat,max_lon
        #[arg(long, value_parser = parse_bounds, allow_hyphen_values = true)]
        search: BoundingBox,

        /// Antenna height above ground, meters
        #[arg(long, default_value = "10")]
        height: f64,

        /// Target lattice points per axis
        #[arg(long, default_value = "10")]
        target_grid: usize,

        /// Coarse search lattice points per axis
        #[arg(long, default_value = "5")]
        search_grid: usize,

        /// Coarse candidates refined by hill climbing
        #[arg(long, default_value = "3")]
        top_k: usize,

        /// Hill-climbing iterations per candidate
        #[arg(long, default_value = "10")]
        steps: usize,

        /// Resolution product: high, standard or adaptive
        #[arg(long, default_value = "standard")]
        product: ResolutionProduct,

        /// Terrain clearance required below the sight line, meters
        #[arg(long, default_value = "10")]
        margin: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,

        /// Write every evaluated candidate as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write evaluated candidates as a GeoJSON FeatureCollection
        #[arg(long)]
        geojson: Option<PathBuf>,
    },

    /// Query ground elevation at a single coordinate
    Elevation {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Resolution product: high, standard or adaptive
        #[arg(long, default_value = "standard")]
        product: ResolutionProduct,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Inspect or populate the tile cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Download every tile of a box
    Ensure {
        /// min_lat,min_lon,max_lat,max_lon
        #[arg(long, value_parser = parse_bounds, allow_hyphen_values = true)]
        bounds: BoundingBox,

        /// Resolution product: high, standard or adaptive
        #[arg(long, default_value = "standard")]
        product: ResolutionProduct,
    },

    /// List covered boxes from the manifests
    List {
        /// Only this product (high or standard)
        #[arg(long)]
        product: Option<ResolutionProduct>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "viewshed=debug,viewshed_cli=debug"
    } else {
        "viewshed=info,viewshed_cli=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = CacheOptions {
        cache_dir: cli.cache_dir,
        mirror_dir: cli.mirror_dir,
        download: cli.download,
        download_url: cli.download_url,
        timeout_secs: cli.timeout,
        tile_cache_size: cli.tile_cache_size,
    };

    match cli.command {
        Commands::Compute {
            lat,
            lon,
            height,
            radius,
            grid_points,
            product,
            margin,
            json,
            geojson,
        } => commands::compute::run(
            &options,
            commands::compute::Args {
                lat,
                lon,
                height,
                radius,
                grid_points,
                product,
                margin,
            },
            json,
            geojson,
        ),
        Commands::Optimize {
            target,
            search,
            height,
            target_grid,
            search_grid,
            top_k,
            steps,
            product,
            margin,
            json,
            csv,
            geojson,
        } => commands::optimize::run(
            &options,
            commands::optimize::Args {
                target,
                search,
                height,
                target_grid,
                search_grid,
                top_k,
                steps,
                product,
                margin,
            },
            json,
            csv,
            geojson,
        ),
        Commands::Elevation {
            lat,
            lon,
            product,
            json,
        } => commands::elevation::run(&options, lat, lon, product, json),
        Commands::Cache { command } => match command {
            CacheCommands::Ensure { bounds, product } => {
                commands::cache::ensure(&options, bounds, product)
            }
            CacheCommands::List { product } => commands::cache::list(&options, product),
        },
    }
}
