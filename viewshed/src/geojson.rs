//! GeoJSON export of viewshed and optimization results.
//!
//! Enable the `geojson` feature to use this module. Coordinates are written in
//! GeoJSON order, `[lon, lat]`.
//!
//! # Example
//!
//! ```ignore
//! use viewshed::geojson::viewshed_feature_collection;
//!
//! let result = compute_viewshed(&cache, &request, RunControl::new())?;
//! let collection = viewshed_feature_collection(&result);
//! std::fs::write("viewshed.geojson", collection.to_string())?;
//! ```

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value as GeoJsonValue};

use crate::geo::GeoPoint;
use crate::grid::ViewshedResult;
use crate::optimizer::OptimizationResult;

/// Visible points, then blocked points, then the observer.
///
/// The collection carries `properties.grid_spacing_meters` as a foreign
/// member so map clients can size the marker for each lattice cell.
pub fn viewshed_feature_collection(result: &ViewshedResult) -> FeatureCollection {
    let classified = result
        .visible
        .iter()
        .map(|p| (p, true))
        .chain(result.blocked.iter().map(|p| (p, false)));

    let mut features: Vec<Feature> = classified
        .map(|(point, visible)| {
            let mut properties = JsonObject::new();
            properties.insert("visible".to_string(), JsonValue::from(visible));
            point_feature(point, properties)
        })
        .collect();

    let observer = &result.observer;
    let mut properties = JsonObject::new();
    properties.insert("type".to_string(), JsonValue::from("observer"));
    properties.insert("height_agl".to_string(), JsonValue::from(observer.antenna_agl_m));
    properties.insert(
        "elevation_msl".to_string(),
        JsonValue::from(observer.ground_elevation_m),
    );
    features.push(point_feature(&observer.location, properties));

    let mut collection_properties = JsonObject::new();
    collection_properties.insert(
        "grid_spacing_meters".to_string(),
        JsonValue::from(result.grid_spacing_km() * 1000.0),
    );
    let mut foreign_members = JsonObject::new();
    foreign_members.insert(
        "properties".to_string(),
        JsonValue::Object(collection_properties),
    );

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign_members),
    }
}

/// One point per evaluated candidate, `best: true` on the first occurrence of the winner.
pub fn optimization_feature_collection(result: &OptimizationResult) -> FeatureCollection {
    let mut winner_marked = false;
    let features = result
        .evaluated
        .iter()
        .map(|candidate| {
            let best = !winner_marked && *candidate == result.best;
            winner_marked |= best;

            let mut properties = JsonObject::new();
            properties.insert(
                "coverage_pct".to_string(),
                JsonValue::from(candidate.coverage_pct),
            );
            properties.insert(
                "visible_count".to_string(),
                JsonValue::from(candidate.visible_count),
            );
            properties.insert(
                "target_count".to_string(),
                JsonValue::from(candidate.target_count),
            );
            properties.insert(
                "ground_elevation_m".to_string(),
                JsonValue::from(candidate.ground_elevation_m),
            );
            properties.insert("best".to_string(), JsonValue::from(best));
            point_feature(&candidate.location, properties)
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn point_feature(point: &GeoPoint, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(GeoJsonValue::Point(vec![point.lon, point.lat]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}
