//! Radio line-of-sight evaluation.
//!
//! A path from the observer's antenna to a target on the ground is sampled at
//! evenly spaced fractions along the WGS84 geodesic. At each sample the
//! straight sight line, corrected for Earth curvature, must clear the terrain
//! by a fixed margin. The margin is a coarse stand-in for Fresnel-zone
//! clearance and is not frequency dependent.

use serde::{Deserialize, Serialize};

use crate::cache::{ElevationCache, TileHandle};
use crate::elevation::Elevation;
use crate::geo::{self, GeoPoint, EARTH_RADIUS_M};

/// Samples taken along each path.
pub const DEFAULT_SAMPLES: usize = 20;

/// Required clearance between terrain and the sight line, in meters.
pub const DEFAULT_CLEARANCE_MARGIN_M: f64 = 10.0;

/// Targets closer than this are always visible.
pub const TRIVIAL_RANGE_M: f64 = 10.0;

/// How Earth curvature enters the sight-line height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurvatureModel {
    /// Terrain bulges into the chord between the endpoints: the line is
    /// lowered by `d·(D−d) / 2R` at distance `d` of a path of length `D`.
    #[default]
    EarthBulge,
    /// The line is raised by `d² / 2R`.
    LineLift,
}

impl CurvatureModel {
    /// Height correction added to the straight line `distance_m` into a path of `path_m`.
    pub fn correction(self, distance_m: f64, path_m: f64, earth_radius_m: f64) -> f64 {
        match self {
            CurvatureModel::EarthBulge => {
                -distance_m * (path_m - distance_m) / (2.0 * earth_radius_m)
            }
            CurvatureModel::LineLift => distance_m * distance_m / (2.0 * earth_radius_m),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LosParams {
    /// Path is divided into this many segments; interior points are sampled.
    pub samples: usize,
    pub clearance_margin_m: f64,
    pub earth_radius_m: f64,
    pub curvature: CurvatureModel,
}

impl Default for LosParams {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            clearance_margin_m: DEFAULT_CLEARANCE_MARGIN_M,
            earth_radius_m: EARTH_RADIUS_M,
            curvature: CurvatureModel::default(),
        }
    }
}

impl LosParams {
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_clearance_margin(mut self, meters: f64) -> Self {
        self.clearance_margin_m = meters;
        self
    }

    pub fn with_curvature(mut self, curvature: CurvatureModel) -> Self {
        self.curvature = curvature;
        self
    }
}

/// Source of ground elevations for path sampling.
pub trait Terrain: Sync {
    fn elevation(&self, point: &GeoPoint) -> Elevation;

    /// Elevations for many points, in input order.
    fn elevations(&self, points: &[GeoPoint]) -> Vec<Elevation> {
        points.iter().map(|p| self.elevation(p)).collect()
    }
}

impl<F> Terrain for F
where
    F: Fn(&GeoPoint) -> Elevation + Sync,
{
    fn elevation(&self, point: &GeoPoint) -> Elevation {
        self(point)
    }
}

/// Terrain served from an [`ElevationCache`] through an open handle.
#[derive(Clone, Copy)]
pub struct CoverageTerrain<'a> {
    cache: &'a ElevationCache,
    handle: &'a TileHandle,
}

impl<'a> CoverageTerrain<'a> {
    pub fn new(cache: &'a ElevationCache, handle: &'a TileHandle) -> Self {
        Self { cache, handle }
    }
}

impl Terrain for CoverageTerrain<'_> {
    fn elevation(&self, point: &GeoPoint) -> Elevation {
        self.cache.sample(point, self.handle)
    }

    fn elevations(&self, points: &[GeoPoint]) -> Vec<Elevation> {
        self.cache.get_elevations_batch(points, self.handle)
    }
}

/// An antenna site, resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub location: GeoPoint,
    /// Antenna height above ground, meters.
    pub antenna_agl_m: f64,
    /// Ground elevation at the site, meters MSL.
    pub ground_elevation_m: f64,
}

impl Observer {
    pub fn new(location: GeoPoint, antenna_agl_m: f64, ground_elevation_m: f64) -> Self {
        Self {
            location,
            antenna_agl_m,
            ground_elevation_m,
        }
    }

    /// Antenna height in meters MSL.
    pub fn antenna_msl_m(&self) -> f64 {
        self.ground_elevation_m + self.antenna_agl_m
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilityResult {
    pub visible: bool,
    /// Geodesic distance from the observer, meters.
    pub distance_m: f64,
}

/// Decide whether `target`, standing on ground at `target_elevation_m`, is in
/// line of sight of `observer`.
///
/// Missing terrain samples count as sea level.
pub fn evaluate<T: Terrain + ?Sized>(
    terrain: &T,
    observer: &Observer,
    target: &GeoPoint,
    target_elevation_m: f64,
    params: &LosParams,
) -> VisibilityResult {
    let line = geo::inverse(&observer.location, target);
    let path_m = line.distance_m;
    let visible = |visible| VisibilityResult {
        visible,
        distance_m: path_m,
    };

    if path_m < TRIVIAL_RANGE_M || params.samples < 2 {
        return visible(true);
    }

    let n = params.samples as f64;
    let fractions: Vec<f64> = (1..params.samples).map(|i| i as f64 / n).collect();
    let points: Vec<GeoPoint> = fractions
        .iter()
        .map(|f| observer.location.destination(line.azimuth_deg, path_m * f))
        .collect();
    let ground = terrain.elevations(&points);

    let start_m = observer.antenna_msl_m();
    for (fraction, elevation) in fractions.iter().zip(ground) {
        let d = path_m * fraction;
        let sight_line = start_m + (target_elevation_m - start_m) * fraction
            + params.curvature.correction(d, path_m, params.earth_radius_m);

        if elevation.or_sea_level() > sight_line - params.clearance_margin_m {
            return visible(false);
        }
    }
    visible(true)
}

/// Line-of-sight check with default parameters and a chosen sample count.
pub fn is_visible<T: Terrain + ?Sized>(
    terrain: &T,
    observer: &GeoPoint,
    observer_agl_m: f64,
    target: &GeoPoint,
    target_elevation_m: f64,
    observer_ground_m: f64,
    samples: usize,
) -> bool {
    let observer = Observer::new(*observer, observer_agl_m, observer_ground_m);
    let params = LosParams::default().with_samples(samples);
    evaluate(terrain, &observer, target, target_elevation_m, &params).visible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(_: &GeoPoint) -> Elevation {
        Elevation::Meters(0.0)
    }

    fn no_data(_: &GeoPoint) -> Elevation {
        Elevation::Absent
    }

    #[test]
    fn test_trivial_range() {
        let wall = |_: &GeoPoint| Elevation::Meters(10_000.0);
        let origin = GeoPoint::new(47.0, 8.0);
        let near = origin.destination(90.0, 9.0);
        assert!(is_visible(&wall, &origin, 0.0, &near, 0.0, 0.0, DEFAULT_SAMPLES));
        assert!(is_visible(&wall, &origin, 0.0, &origin, 0.0, 0.0, DEFAULT_SAMPLES));
    }

    #[test]
    fn test_ridge_blocks() {
        let origin = GeoPoint::new(47.0, 8.0);
        let target = origin.destination(90.0, 4_000.0);
        let midpoint = origin.destination(90.0, 2_000.0);

        // 200 m ridge straddling the path midpoint
        let ridge = move |p: &GeoPoint| {
            if (p.lon - midpoint.lon).abs() < 0.003 {
                Elevation::Meters(200.0)
            } else {
                Elevation::Meters(0.0)
            }
        };
        let observer = Observer::new(origin, 10.0, 0.0);
        let result = evaluate(&ridge, &observer, &target, 0.0, &LosParams::default());
        assert!(!result.visible);
        assert!((result.distance_m - 4_000.0).abs() < 1e-6);

        // A tall enough mast clears it
        let mast = Observer::new(origin, 500.0, 0.0);
        assert!(evaluate(&ridge, &mast, &target, 0.0, &LosParams::default()).visible);
    }

    #[test]
    fn test_clearance_margin() {
        let origin = GeoPoint::new(0.0, 0.0);
        let target = origin.destination(0.0, 1_000.0);
        let observer = Observer::new(origin, 5.0, 0.0);
        let straight = LosParams::default().with_curvature(CurvatureModel::LineLift);

        // Line at 5 m falls toward 0 m; the default 10 m margin cannot be met
        assert!(!evaluate(&flat, &observer, &target, 0.0, &straight).visible);
        let no_margin = straight.with_clearance_margin(0.0);
        assert!(evaluate(&flat, &observer, &target, 0.0, &no_margin).visible);
    }

    #[test]
    fn test_absent_counts_as_sea_level() {
        let origin = GeoPoint::new(10.0, 10.0);
        let target = origin.destination(45.0, 3_000.0);
        let params = LosParams::default().with_clearance_margin(0.0);
        let observer = Observer::new(origin, 10.0, 0.0);

        assert_eq!(
            evaluate(&flat, &observer, &target, 0.0, &params),
            evaluate(&no_data, &observer, &target, 0.0, &params)
        );
    }

    #[test]
    fn test_curvature_models() {
        assert_eq!(CurvatureModel::EarthBulge.correction(0.0, 10_000.0, EARTH_RADIUS_M), 0.0);
        let bulge = CurvatureModel::EarthBulge.correction(5_000.0, 10_000.0, EARTH_RADIUS_M);
        assert!((bulge + 25_000_000.0 / (2.0 * EARTH_RADIUS_M)).abs() < 1e-9);
        let lift = CurvatureModel::LineLift.correction(5_000.0, 10_000.0, EARTH_RADIUS_M);
        assert!((lift - 25_000_000.0 / (2.0 * EARTH_RADIUS_M)).abs() < 1e-9);
    }

    #[test]
    fn test_single_sample_has_no_interior_points() {
        let wall = |_: &GeoPoint| Elevation::Meters(10_000.0);
        let origin = GeoPoint::new(0.0, 0.0);
        let target = origin.destination(0.0, 50_000.0);
        assert!(is_visible(&wall, &origin, 1.0, &target, 0.0, 0.0, 1));
    }
}
