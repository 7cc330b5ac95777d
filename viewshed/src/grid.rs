//! Viewshed over a rectilinear lattice around an observer.
//!
//! The lattice is `grid_points × grid_points`, spanning ±radius in both
//! directions (longitude spacing widened by `1 / cos(latitude)`), so its
//! resolution depends only on `grid_points`. Corners beyond the circular
//! radius are discarded; the observer's own cell is skipped. Near a pole,
//! lattice rows past ±90° are dropped. Viewsheds whose coverage would cross
//! the antimeridian are rejected.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::ElevationCache;
use crate::control::RunControl;
use crate::elevation::{Elevation, ResolutionProduct};
use crate::error::{Result, ViewshedError};
use crate::geo::{BoundingBox, GeoPoint};
use crate::los::{evaluate, CoverageTerrain, LosParams, Observer, Terrain, VisibilityResult};

pub const MIN_GRID_POINTS: usize = 2;
pub const MAX_GRID_POINTS: usize = 1000;

/// Coverage is ensured over the radius grown by this fraction.
pub const COVERAGE_PADDING_FRACTION: f64 = 0.1;

const OBSERVER_CELL_EPSILON_DEG: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewshedRequest {
    pub observer: GeoPoint,
    pub antenna_agl_m: f64,
    pub radius_km: f64,
    pub grid_points: usize,
    pub product: ResolutionProduct,
    pub los: LosParams,
}

impl ViewshedRequest {
    pub fn new(observer: GeoPoint, antenna_agl_m: f64, radius_km: f64, grid_points: usize) -> Self {
        Self {
            observer,
            antenna_agl_m,
            radius_km,
            grid_points,
            product: ResolutionProduct::default(),
            los: LosParams::default(),
        }
    }

    pub fn with_product(mut self, product: ResolutionProduct) -> Self {
        self.product = product;
        self
    }

    pub fn with_los(mut self, los: LosParams) -> Self {
        self.los = los;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.observer.validate()?;
        validate_antenna(self.antenna_agl_m)?;
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(ViewshedError::invalid_input(format!(
                "radius {} km must be positive",
                self.radius_km
            )));
        }
        if !(MIN_GRID_POINTS..=MAX_GRID_POINTS).contains(&self.grid_points) {
            return Err(ViewshedError::invalid_input(format!(
                "grid_points {} must be between {} and {}",
                self.grid_points, MIN_GRID_POINTS, MAX_GRID_POINTS
            )));
        }
        let needed = self.padded_area();
        if needed.min_lon < -180.0 || needed.max_lon > 180.0 {
            return Err(ViewshedError::invalid_input(format!(
                "viewshed of {} km around {} crosses the antimeridian",
                self.radius_km, self.observer
            )));
        }
        Ok(())
    }

    /// Box whose coverage the computation needs.
    pub fn coverage_bounds(&self) -> BoundingBox {
        self.padded_area().clamped()
    }

    fn padded_area(&self) -> BoundingBox {
        BoundingBox::around(self.observer, self.radius_km * (1.0 + COVERAGE_PADDING_FRACTION))
    }
}

pub(crate) fn validate_antenna(antenna_agl_m: f64) -> Result<()> {
    if !antenna_agl_m.is_finite() || antenna_agl_m < 0.0 {
        return Err(ViewshedError::invalid_input(format!(
            "antenna height {} m must be zero or more",
            antenna_agl_m
        )));
    }
    Ok(())
}

/// Visible and blocked lattice points, in lattice order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewshedResult {
    pub observer: Observer,
    pub visible: Vec<GeoPoint>,
    pub blocked: Vec<GeoPoint>,
    /// Distance to the farthest visible point, km. Zero when nothing is visible.
    pub max_visible_range_km: f64,
    pub radius_km: f64,
    pub grid_points: usize,
}

impl ViewshedResult {
    /// Lattice points classified (inside the radius, observer cell excluded).
    pub fn tested_count(&self) -> usize {
        self.visible.len() + self.blocked.len()
    }

    pub fn visibility_pct(&self) -> f64 {
        match self.tested_count() {
            0 => 0.0,
            n => 100.0 * self.visible.len() as f64 / n as f64,
        }
    }

    /// Lattice spacing in km.
    pub fn grid_spacing_km(&self) -> f64 {
        2.0 * self.radius_km / (self.grid_points.max(2) - 1) as f64
    }
}

/// Lattice used for a viewshed, row-major from south-west.
///
/// Rows beyond a pole are not valid positions and are left out.
pub fn viewshed_lattice(observer: &GeoPoint, radius_km: f64, grid_points: usize) -> Vec<GeoPoint> {
    BoundingBox::around(*observer, radius_km)
        .lattice(grid_points)
        .into_iter()
        .filter(|p| (-90.0..=90.0).contains(&p.lat))
        .collect()
}

/// Compute a viewshed against cached terrain.
///
/// # Errors
///
/// - [`ViewshedError::InvalidInput`] before any download for bad parameters
/// - coverage failures from [`ElevationCache::ensure_coverage`]
/// - [`ViewshedError::ObserverElevationUnavailable`] when the site has no data
/// - [`ViewshedError::Cancelled`]
pub fn compute_viewshed(
    cache: &ElevationCache,
    request: &ViewshedRequest,
    control: RunControl<'_>,
) -> Result<ViewshedResult> {
    request.validate()?;
    control.check()?;

    let handle = cache.ensure_coverage(&request.coverage_bounds(), request.product)?;
    let terrain = CoverageTerrain::new(cache, &handle);

    let ground_m = match terrain.elevation(&request.observer) {
        Elevation::Meters(m) => m,
        Elevation::Absent => {
            return Err(ViewshedError::ObserverElevationUnavailable {
                lat: request.observer.lat,
                lon: request.observer.lon,
            })
        }
    };
    let observer = Observer::new(request.observer, request.antenna_agl_m, ground_m);

    tracing::debug!(
        observer = %request.observer,
        ground_m,
        radius_km = request.radius_km,
        grid_points = request.grid_points,
        "computing viewshed"
    );
    viewshed_on_terrain(&terrain, &observer, request, control)
}

/// Classify the lattice around an already-resolved observer.
pub fn viewshed_on_terrain<T: Terrain + ?Sized>(
    terrain: &T,
    observer: &Observer,
    request: &ViewshedRequest,
    control: RunControl<'_>,
) -> Result<ViewshedResult> {
    let origin = observer.location;
    let radius_m = request.radius_km * 1000.0;

    let candidates: Vec<GeoPoint> =
        viewshed_lattice(&origin, request.radius_km, request.grid_points)
            .into_iter()
            .filter(|p| {
                (p.lat - origin.lat).abs() >= OBSERVER_CELL_EPSILON_DEG
                    || (p.lon - origin.lon).abs() >= OBSERVER_CELL_EPSILON_DEG
            })
            .collect();
    let ground = terrain.elevations(&candidates);

    let phase = control.phase(candidates.len(), "classifying viewshed lattice");
    let classified = candidates
        .par_iter()
        .zip(ground.par_iter())
        .map(|(point, elevation)| -> Result<Option<(GeoPoint, VisibilityResult)>> {
            phase.step()?;
            let distance_m = origin.distance_to(point);
            if distance_m.is_nan() || distance_m > radius_m {
                return Ok(None);
            }
            let result = evaluate(terrain, observer, point, elevation.or_sea_level(), &request.los);
            Ok(Some((*point, result)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut visible = Vec::new();
    let mut blocked = Vec::new();
    let mut max_visible_m: f64 = 0.0;
    for (point, result) in classified.into_iter().flatten() {
        if result.visible {
            max_visible_m = max_visible_m.max(result.distance_m);
            visible.push(point);
        } else {
            blocked.push(point);
        }
    }

    Ok(ViewshedResult {
        observer: *observer,
        visible,
        blocked,
        max_visible_range_km: max_visible_m / 1000.0,
        radius_km: request.radius_km,
        grid_points: request.grid_points,
    })
}
