//! Antenna site search maximizing line-of-sight coverage of a target area.
//!
//! A fixed lattice of target points is laid over the target box. Every point
//! of a coarse lattice over the search box is scored by the percentage of
//! targets it can see; the best `top_k` are then refined independently by
//! hill climbing over the 8 compass neighbours with a shrinking step.
//!
//! Ties are broken by first-found order: coarse candidates rank in lattice
//! order, neighbours in N, NE, E, SE, S, SW, W, NW order, and climbs in rank
//! order.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::ElevationCache;
use crate::control::RunControl;
use crate::elevation::{Elevation, ResolutionProduct};
use crate::error::{Result, ViewshedError};
use crate::geo::{BoundingBox, GeoPoint};
use crate::grid::{validate_antenna, MAX_GRID_POINTS};
use crate::los::{evaluate, CoverageTerrain, LosParams, Observer, Terrain};

/// Degrees added around the union of target and search boxes for coverage.
pub const COVERAGE_PADDING_DEG: f64 = 0.05;

/// Step at climb iteration `i` is `step / (1 + STEP_DECAY * i)`.
const STEP_DECAY: f64 = 0.2;

/// (Δlat, Δlon) unit offsets: N, NE, E, SE, S, SW, W, NW.
const COMPASS: [(f64, f64); 8] = [
    (1.0, 0.0),
    (1.0, 1.0),
    (0.0, 1.0),
    (-1.0, 1.0),
    (-1.0, 0.0),
    (-1.0, -1.0),
    (0.0, -1.0),
    (1.0, -1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub target_bounds: BoundingBox,
    pub search_bounds: BoundingBox,
    pub antenna_agl_m: f64,
    pub target_grid_size: usize,
    pub search_grid_size: usize,
    pub top_k: usize,
    pub hill_climb_steps: usize,
    pub product: ResolutionProduct,
    pub los: LosParams,
}

impl OptimizeRequest {
    /// Defaults: 10×10 targets, 5×5 coarse search, top 3, 10 climb steps.
    pub fn new(target_bounds: BoundingBox, search_bounds: BoundingBox, antenna_agl_m: f64) -> Self {
        Self {
            target_bounds,
            search_bounds,
            antenna_agl_m,
            target_grid_size: 10,
            search_grid_size: 5,
            top_k: 3,
            hill_climb_steps: 10,
            product: ResolutionProduct::default(),
            los: LosParams::default(),
        }
    }

    pub fn with_grid_sizes(mut self, target_grid_size: usize, search_grid_size: usize) -> Self {
        self.target_grid_size = target_grid_size;
        self.search_grid_size = search_grid_size;
        self
    }

    pub fn with_refinement(mut self, top_k: usize, hill_climb_steps: usize) -> Self {
        self.top_k = top_k;
        self.hill_climb_steps = hill_climb_steps;
        self
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
        self.target_bounds.validate()?;
        self.search_bounds.validate()?;
        validate_antenna(self.antenna_agl_m)?;
        for (name, size) in [
            ("target_grid_size", self.target_grid_size),
            ("search_grid_size", self.search_grid_size),
        ] {
            if !(1..=MAX_GRID_POINTS).contains(&size) {
                return Err(ViewshedError::invalid_input(format!(
                    "{} {} must be between 1 and {}",
                    name, size, MAX_GRID_POINTS
                )));
            }
        }
        if self.top_k == 0 {
            return Err(ViewshedError::invalid_input("top_k must be at least 1"));
        }
        Ok(())
    }

    /// Box whose coverage the search needs.
    pub fn coverage_bounds(&self) -> BoundingBox {
        self.target_bounds
            .union(&self.search_bounds)
            .padded(COVERAGE_PADDING_DEG)
    }

    /// Initial hill-climb step per axis: the coarse lattice spacing, or half
    /// the span when the lattice has a single point per axis.
    fn initial_step(&self) -> (f64, f64) {
        let b = &self.search_bounds;
        let divisions = match self.search_grid_size {
            0 | 1 => 2.0,
            n => (n - 1) as f64,
        };
        (
            (b.max_lat - b.min_lat) / divisions,
            (b.max_lon - b.min_lon) / divisions,
        )
    }
}

/// A scored observer location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageCandidate {
    pub location: GeoPoint,
    /// Ground elevation used for the antenna base, meters MSL.
    pub ground_elevation_m: f64,
    pub visible_count: usize,
    pub target_count: usize,
    /// `100 · visible_count / target_count`, in [0, 100].
    pub coverage_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best: CoverageCandidate,
    /// Every candidate scored, coarse phase first, then each climb in rank order.
    pub evaluated: Vec<CoverageCandidate>,
    /// Coarse lattice candidates in lattice order.
    pub coarse: Vec<CoverageCandidate>,
    /// Final candidate of each climb, in rank order.
    pub refined: Vec<CoverageCandidate>,
    pub targets: Vec<GeoPoint>,
}

/// Search for the best antenna site against cached terrain.
///
/// # Errors
///
/// - [`ViewshedError::InvalidInput`] before any download for bad parameters
/// - coverage failures from [`ElevationCache::ensure_coverage`]
/// - [`ViewshedError::Cancelled`]
pub fn optimize_coverage(
    cache: &ElevationCache,
    request: &OptimizeRequest,
    control: RunControl<'_>,
) -> Result<OptimizationResult> {
    request.validate()?;
    control.check()?;

    let handle = cache.ensure_coverage(&request.coverage_bounds(), request.product)?;
    let terrain = CoverageTerrain::new(cache, &handle);
    optimize_on_terrain(&terrain, request, control)
}

/// Run the search on any terrain.
pub fn optimize_on_terrain<T: Terrain + ?Sized>(
    terrain: &T,
    request: &OptimizeRequest,
    control: RunControl<'_>,
) -> Result<OptimizationResult> {
    let target_points = request.target_bounds.lattice(request.target_grid_size);
    let targets: Vec<(GeoPoint, f64)> = target_points
        .iter()
        .copied()
        .zip(terrain.elevations(&target_points).into_iter().map(Elevation::or_sea_level))
        .collect();
    let scorer = Scorer {
        terrain,
        targets: &targets,
        antenna_agl_m: request.antenna_agl_m,
        params: &request.los,
    };

    let seeds = request.search_bounds.lattice(request.search_grid_size);
    let coarse_phase = control.phase(seeds.len(), "evaluating coarse candidates");
    let coarse = seeds
        .par_iter()
        .map(|location| -> Result<CoverageCandidate> {
            coarse_phase.step()?;
            Ok(scorer.score(*location))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut ranked = coarse.clone();
    // Stable sort keeps lattice order among equal scores
    ranked.sort_by(|a, b| {
        b.coverage_pct
            .partial_cmp(&a.coverage_pct)
            .unwrap_or(Ordering::Equal)
    });
    ranked.truncate(request.top_k);

    let step = request.initial_step();
    let climb_phase = control.phase(ranked.len(), "refining candidates");
    let climbs = ranked
        .par_iter()
        .map(|seed| -> Result<Climb> {
            let climb = hill_climb(&scorer, *seed, step, request, control)?;
            climb_phase.step()?;
            Ok(climb)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut evaluated = coarse.clone();
    let mut refined = Vec::with_capacity(climbs.len());
    for climb in climbs {
        evaluated.extend(climb.evaluated);
        refined.push(climb.best);
    }

    let best = refined
        .iter()
        .copied()
        .reduce(|best, c| if c.coverage_pct > best.coverage_pct { c } else { best })
        .ok_or_else(|| ViewshedError::invalid_input("search lattice is empty"))?;

    tracing::debug!(
        best = %best.location,
        coverage_pct = best.coverage_pct,
        evaluated = evaluated.len(),
        "optimization finished"
    );

    Ok(OptimizationResult {
        best,
        evaluated,
        coarse,
        refined,
        targets: target_points,
    })
}

struct Scorer<'a, T: ?Sized> {
    terrain: &'a T,
    targets: &'a [(GeoPoint, f64)],
    antenna_agl_m: f64,
    params: &'a LosParams,
}

impl<T: Terrain + ?Sized> Scorer<'_, T> {
    fn score(&self, location: GeoPoint) -> CoverageCandidate {
        let ground = self.terrain.elevation(&location).or_sea_level();
        let observer = Observer::new(location, self.antenna_agl_m, ground);

        let visible_count = self
            .targets
            .iter()
            .filter(|(target, elevation)| {
                evaluate(self.terrain, &observer, target, *elevation, self.params).visible
            })
            .count();
        let target_count = self.targets.len();
        let coverage_pct = if target_count == 0 {
            0.0
        } else {
            100.0 * visible_count as f64 / target_count as f64
        };

        CoverageCandidate {
            location,
            ground_elevation_m: ground,
            visible_count,
            target_count,
            coverage_pct,
        }
    }
}

struct Climb {
    best: CoverageCandidate,
    evaluated: Vec<CoverageCandidate>,
}

fn hill_climb<T: Terrain + ?Sized>(
    scorer: &Scorer<'_, T>,
    seed: CoverageCandidate,
    step: (f64, f64),
    request: &OptimizeRequest,
    control: RunControl<'_>,
) -> Result<Climb> {
    let bounds = &request.search_bounds;
    let mut current = seed;
    let mut evaluated = Vec::new();

    for iteration in 0..request.hill_climb_steps {
        control.check()?;
        let scale = 1.0 + STEP_DECAY * iteration as f64;
        let (dlat, dlon) = (step.0 / scale, step.1 / scale);

        let mut improved: Option<CoverageCandidate> = None;
        for (north, east) in COMPASS {
            let location = bounds.clamp_point(GeoPoint::new(
                current.location.lat + north * dlat,
                current.location.lon + east * dlon,
            ));
            if location == current.location {
                continue;
            }
            let candidate = scorer.score(location);
            evaluated.push(candidate);

            let bar = improved.map_or(current.coverage_pct, |c| c.coverage_pct);
            if candidate.coverage_pct > bar {
                improved = Some(candidate);
            }
        }

        match improved {
            Some(next) => current = next,
            None => break,
        }
    }

    Ok(Climb {
        best: current,
        evaluated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(_: &GeoPoint) -> Elevation {
        Elevation::Meters(0.0)
    }

    /// Wall along longitude 10.02 hiding everything east of it from low sites
    fn wall(p: &GeoPoint) -> Elevation {
        if (p.lon - 10.02).abs() < 0.002 {
            Elevation::Meters(400.0)
        } else {
            Elevation::Meters(0.0)
        }
    }

    fn request() -> OptimizeRequest {
        OptimizeRequest::new(
            BoundingBox::new(0.0, 10.03, 0.02, 10.05),
            BoundingBox::new(0.0, 10.0, 0.02, 10.06),
            30.0,
        )
        .with_grid_sizes(3, 3)
        .with_refinement(2, 4)
        .with_los(LosParams::default().with_clearance_margin(0.0))
    }

    #[test]
    fn test_validation() {
        assert!(request().validate().is_ok());
        assert!(request().with_grid_sizes(0, 3).validate().is_err());
        assert!(request().with_refinement(0, 3).validate().is_err());
        let mut bad = request();
        bad.search_bounds = BoundingBox::new(1.0, 10.0, 0.0, 10.1);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_initial_step() {
        let r = request();
        let (dlat, dlon) = r.initial_step();
        assert!((dlat - 0.01).abs() < 1e-12);
        assert!((dlon - 0.03).abs() < 1e-12);

        let (dlat, _) = r.with_grid_sizes(3, 1).initial_step();
        assert!((dlat - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_percentages_consistent() {
        let result = optimize_on_terrain(&wall, &request(), RunControl::new()).unwrap();
        assert_eq!(result.targets.len(), 9);
        assert_eq!(result.coarse.len(), 9);
        for c in &result.evaluated {
            assert!((0.0..=100.0).contains(&c.coverage_pct));
            assert_eq!(c.target_count, 9);
            let expected = 100.0 * c.visible_count as f64 / 9.0;
            assert!((c.coverage_pct - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_best_is_east_of_wall() {
        let result = optimize_on_terrain(&wall, &request(), RunControl::new()).unwrap();
        assert!(result.best.location.lon > 10.02);
        assert_eq!(result.best.coverage_pct, 100.0);
        // Coarse west column sees nothing across the wall
        assert_eq!(result.coarse[0].visible_count, 0);
    }

    #[test]
    fn test_climbs_never_lose_coverage() {
        let result = optimize_on_terrain(&wall, &request(), RunControl::new()).unwrap();
        let mut ranked = result.coarse.clone();
        ranked.sort_by(|a, b| b.coverage_pct.partial_cmp(&a.coverage_pct).unwrap());
        for (seed, end) in ranked.iter().zip(&result.refined) {
            assert!(end.coverage_pct >= seed.coverage_pct);
        }
    }

    #[test]
    fn test_ties_keep_first_found() {
        // Everything sees everything: all candidates tie, first coarse point wins
        let result = optimize_on_terrain(&flat, &request(), RunControl::new()).unwrap();
        assert_eq!(result.best, result.coarse[0]);
        assert_eq!(result.refined.len(), 2);
    }

    #[test]
    fn test_single_coarse_candidate() {
        let r = request().with_grid_sizes(3, 1);
        let result = optimize_on_terrain(&wall, &r, RunControl::new()).unwrap();
        assert_eq!(result.coarse.len(), 1);
        assert_eq!(result.coarse[0].location, r.search_bounds.center());
        assert_eq!(result.refined.len(), 1);
        for c in &result.evaluated {
            assert!(r.search_bounds.contains(&c.location));
        }
    }
}
