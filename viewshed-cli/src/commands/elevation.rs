use anyhow::{bail, Result};
use viewshed::{Elevation, GeoPoint, ResolutionProduct};

use super::CacheOptions;

pub fn run(
    options: &CacheOptions,
    lat: f64,
    lon: f64,
    product: ResolutionProduct,
    json: bool,
) -> Result<()> {
    let point = GeoPoint::new(lat, lon);
    if let Err(e) = point.validate() {
        bail!("{}", e);
    }

    let cache = options.open(product)?;
    let elevation = cache.get_elevation(&point);

    if json {
        let output = serde_json::json!({
            "lat": lat,
            "lon": lon,
            "product": product.to_string(),
            "elevation": elevation.meters(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match elevation {
            Elevation::Meters(m) => println!("Elevation at {}: {:.0}m", point, m),
            Elevation::Absent => println!("No elevation data at {}", point),
        }
    }

    Ok(())
}
