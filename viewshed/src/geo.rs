//! Geodetic primitives: points, bounding boxes, WGS84 geodesics and lattices.
//!
//! Distances and bearings are computed on the WGS84 ellipsoid. Box-sizing
//! helpers use the coarse `1° ≈ 111 km` rule, with longitude spans widened by
//! `1 / cos(latitude)`.

use std::fmt;
use std::sync::OnceLock;

use geographiclib_rs::{DirectGeodesic, Geodesic, InverseGeodesic};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewshedError};
use crate::tile::TileKey;

/// Mean Earth radius in meters, used for curvature corrections.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Kilometers per degree of latitude (approximate).
pub const KM_PER_DEGREE: f64 = 111.0;

/// Tolerance for comparing box edges, in degrees.
const EDGE_EPSILON_DEG: f64 = 1e-9;

fn wgs84() -> &'static Geodesic {
    static WGS84: OnceLock<Geodesic> = OnceLock::new();
    WGS84.get_or_init(Geodesic::wgs84)
}

/// An immutable WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Reject coordinates outside [-90, 90] × [-180, 180].
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ViewshedError::invalid_input(format!(
                "latitude {} must be between -90 and 90",
                self.lat
            )));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(ViewshedError::invalid_input(format!(
                "longitude {} must be between -180 and 180",
                self.lon
            )));
        }
        Ok(())
    }

    /// Geodesic distance in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        inverse(self, other).distance_m
    }

    /// Point reached by travelling `distance_m` along the geodesic leaving at `azimuth_deg`.
    pub fn destination(&self, azimuth_deg: f64, distance_m: f64) -> GeoPoint {
        direct(self, azimuth_deg, distance_m)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.lat, self.lon)
    }
}

/// Solution of the inverse geodesic problem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodesicLine {
    /// Distance along the ellipsoid in meters.
    pub distance_m: f64,
    /// Initial bearing at the start point, degrees clockwise from north.
    pub azimuth_deg: f64,
}

/// Distance and initial bearing between two points on the WGS84 ellipsoid.
pub fn inverse(from: &GeoPoint, to: &GeoPoint) -> GeodesicLine {
    let (distance_m, azimuth_deg, _azi2, _a12): (f64, f64, f64, f64) =
        wgs84().inverse(from.lat, from.lon, to.lat, to.lon);
    GeodesicLine {
        distance_m,
        azimuth_deg,
    }
}

/// Project a point along a geodesic from `from`.
pub fn direct(from: &GeoPoint, azimuth_deg: f64, distance_m: f64) -> GeoPoint {
    let (lat, lon): (f64, f64) = wgs84().direct(from.lat, from.lon, azimuth_deg, distance_m);
    GeoPoint::new(lat, lon)
}

/// `n` evenly spaced values covering `[start, end]`. A single value is the midpoint.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![(start + end) / 2.0],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// A geographic bounding box.
///
/// Coordinates are in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum latitude (southern boundary).
    pub min_lat: f64,
    /// Minimum longitude (western boundary).
    pub min_lon: f64,
    /// Maximum latitude (northern boundary).
    pub max_lat: f64,
    /// Maximum longitude (eastern boundary).
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    ///
    /// # Arguments
    ///
    /// * `min_lat` - Southern boundary latitude
    /// * `min_lon` - Western boundary longitude
    /// * `max_lat` - Northern boundary latitude
    /// * `max_lon` - Eastern boundary longitude
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Square box extending `radius_km` north, south, east and west of `center`.
    ///
    /// Not clamped: near the poles or the antimeridian the box may leave the
    /// valid coordinate range.
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let lat_offset = radius_km / KM_PER_DEGREE;
        let lon_offset = radius_km / (KM_PER_DEGREE * center.lat.to_radians().cos().max(0.01));
        Self::new(
            center.lat - lat_offset,
            center.lon - lon_offset,
            center.lat + lat_offset,
            center.lon + lon_offset,
        )
    }

    /// Reject non-finite, inverted or out-of-range boxes.
    pub fn validate(&self) -> Result<()> {
        let values = [self.min_lat, self.min_lon, self.max_lat, self.max_lon];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ViewshedError::invalid_input(format!(
                "bounding box {} has non-finite coordinates",
                self
            )));
        }
        if self.min_lat > self.max_lat || self.min_lon > self.max_lon {
            return Err(ViewshedError::invalid_input(format!(
                "bounding box {} has min greater than max",
                self
            )));
        }
        GeoPoint::new(self.min_lat, self.min_lon).validate()?;
        GeoPoint::new(self.max_lat, self.max_lon).validate()
    }

    /// Clamp to the valid coordinate range.
    pub fn clamped(&self) -> Self {
        Self::new(
            self.min_lat.clamp(-90.0, 90.0),
            self.min_lon.clamp(-180.0, 180.0),
            self.max_lat.clamp(-90.0, 90.0),
            self.max_lon.clamp(-180.0, 180.0),
        )
    }

    /// Grow by `degrees` on every side, clamped to the valid range.
    pub fn padded(&self, degrees: f64) -> Self {
        Self::new(
            self.min_lat - degrees,
            self.min_lon - degrees,
            self.max_lat + degrees,
            self.max_lon + degrees,
        )
        .clamped()
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> Self {
        Self::new(
            self.min_lat.min(other.min_lat),
            self.min_lon.min(other.min_lon),
            self.max_lat.max(other.max_lat),
            self.max_lon.max(other.max_lon),
        )
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Whether `point` lies inside (edges inclusive).
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }

    /// Whether `other` lies entirely inside this box.
    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        other.min_lat >= self.min_lat - EDGE_EPSILON_DEG
            && other.min_lon >= self.min_lon - EDGE_EPSILON_DEG
            && other.max_lat <= self.max_lat + EDGE_EPSILON_DEG
            && other.max_lon <= self.max_lon + EDGE_EPSILON_DEG
    }

    /// Clamp a point into the box.
    pub fn clamp_point(&self, point: GeoPoint) -> GeoPoint {
        GeoPoint::new(
            point.lat.clamp(self.min_lat, self.max_lat),
            point.lon.clamp(self.min_lon, self.max_lon),
        )
    }

    /// Unit tiles touched by this box.
    ///
    /// Edges on an integer degree do not pull in the next tile; the tile to the
    /// south/west owns that edge.
    pub fn unit_tiles(&self) -> Vec<TileKey> {
        let (lat_lo, lat_hi) = tile_span(self.min_lat, self.max_lat, -90, 89);
        let (lon_lo, lon_hi) = tile_span(self.min_lon, self.max_lon, -180, 179);

        let mut keys = Vec::new();
        for lat in lat_lo..=lat_hi {
            for lon in lon_lo..=lon_hi {
                keys.push(TileKey::new(lat, lon));
            }
        }
        keys
    }

    /// Partition into chunks on a `chunk_deg` grid aligned to multiples of `chunk_deg`.
    pub fn partition(&self, chunk_deg: f64) -> Vec<BoundingBox> {
        let lat_edges = grid_edges(self.min_lat, self.max_lat, chunk_deg);
        let lon_edges = grid_edges(self.min_lon, self.max_lon, chunk_deg);

        let mut chunks = Vec::new();
        for lat in lat_edges.windows(2) {
            for lon in lon_edges.windows(2) {
                chunks.push(BoundingBox::new(lat[0], lon[0], lat[1], lon[1]));
            }
        }
        chunks
    }

    /// Split into four, preferring an integer-degree cut when one falls inside.
    pub fn quadrants(&self) -> [BoundingBox; 4] {
        let lat = split_point(self.min_lat, self.max_lat);
        let lon = split_point(self.min_lon, self.max_lon);
        [
            BoundingBox::new(self.min_lat, self.min_lon, lat, lon),
            BoundingBox::new(self.min_lat, lon, lat, self.max_lon),
            BoundingBox::new(lat, self.min_lon, self.max_lat, lon),
            BoundingBox::new(lat, lon, self.max_lat, self.max_lon),
        ]
    }

    /// Rectilinear `n × n` lattice, row-major from south-west.
    pub fn lattice(&self, n: usize) -> Vec<GeoPoint> {
        let lats = linspace(self.min_lat, self.max_lat, n);
        let lons = linspace(self.min_lon, self.max_lon, n);
        lats.iter()
            .flat_map(|&lat| lons.iter().map(move |&lon| GeoPoint::new(lat, lon)))
            .collect()
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.4}, {:.4}] to [{:.4}, {:.4}]",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

fn tile_span(min: f64, max: f64, lowest: i32, highest: i32) -> (i32, i32) {
    let lo = (min.floor() as i32).clamp(lowest, highest);
    let hi = (max.ceil() as i32 - 1).clamp(lowest, highest).max(lo);
    (lo, hi)
}

fn grid_edges(min: f64, max: f64, step: f64) -> Vec<f64> {
    let mut edges = vec![min];
    if step > 0.0 {
        let mut k = (min / step).floor() as i64 + 1;
        loop {
            let edge = k as f64 * step;
            if edge >= max - EDGE_EPSILON_DEG {
                break;
            }
            if edge > min + EDGE_EPSILON_DEG {
                edges.push(edge);
            }
            k += 1;
        }
    }
    edges.push(max);
    edges
}

fn split_point(min: f64, max: f64) -> f64 {
    let mid = (min + max) / 2.0;
    let whole = mid.round();
    if whole > min + EDGE_EPSILON_DEG && whole < max - EDGE_EPSILON_DEG {
        whole
    } else {
        mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_validate_point() {
        assert!(GeoPoint::new(47.6, -122.3).validate().is_ok());
        assert!(GeoPoint::new(90.0, 180.0).validate().is_ok());
        assert!(GeoPoint::new(91.0, 0.0).validate().is_err());
        assert!(GeoPoint::new(0.0, -181.0).validate().is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn test_inverse_direct_consistency() {
        let seattle = GeoPoint::new(47.6, -122.3);
        let target = seattle.destination(45.0, 25_000.0);
        let line = inverse(&seattle, &target);

        assert_relative_eq!(line.distance_m, 25_000.0, epsilon = 1e-6);
        assert_relative_eq!(line.azimuth_deg, 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // Meridian arc of 1° near the equator is ~110.57 km on WGS84
        let d = GeoPoint::new(0.0, 0.0).distance_to(&GeoPoint::new(1.0, 0.0));
        assert!((d - 110_574.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 3), vec![0.0, 0.5, 1.0]);
        assert_eq!(linspace(2.0, 4.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_around_widens_longitude() {
        let bbox = BoundingBox::around(GeoPoint::new(60.0, 10.0), 111.0);
        assert_relative_eq!(bbox.max_lat - bbox.min_lat, 2.0, epsilon = 1e-12);
        // cos(60°) = 0.5, so longitude span doubles
        assert_relative_eq!(bbox.max_lon - bbox.min_lon, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_validate_box() {
        assert!(BoundingBox::new(35.0, 138.0, 36.0, 139.0).validate().is_ok());
        assert!(BoundingBox::new(36.0, 138.0, 35.0, 139.0).validate().is_err());
        assert!(BoundingBox::new(35.0, 138.0, 95.0, 139.0).validate().is_err());
    }

    #[test]
    fn test_unit_tiles() {
        let tiles = BoundingBox::new(35.2, 138.2, 36.8, 139.8).unit_tiles();
        assert_eq!(
            tiles,
            vec![
                TileKey::new(35, 138),
                TileKey::new(35, 139),
                TileKey::new(36, 138),
                TileKey::new(36, 139),
            ]
        );

        // Integer north/east edges stay in the south-west tile
        let tiles = BoundingBox::new(35.0, 138.0, 36.0, 139.0).unit_tiles();
        assert_eq!(tiles, vec![TileKey::new(35, 138)]);

        let tiles = BoundingBox::new(-0.5, -0.5, 0.5, 0.5).unit_tiles();
        assert_eq!(tiles.len(), 4);
        assert!(tiles.contains(&TileKey::new(-1, -1)));
    }

    #[test]
    fn test_partition_aligns_to_grid() {
        let chunks = BoundingBox::new(35.2, 138.2, 38.5, 139.8).partition(2.0);
        // Cut at lat 36 and 38; no longitude cut inside (138, 140)
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], BoundingBox::new(35.2, 138.2, 36.0, 139.8));
        assert_eq!(chunks[1], BoundingBox::new(36.0, 138.2, 38.0, 139.8));
        assert_eq!(chunks[2], BoundingBox::new(38.0, 138.2, 38.5, 139.8));

        let single = BoundingBox::new(35.2, 138.2, 35.4, 138.4).partition(2.0);
        assert_eq!(single, vec![BoundingBox::new(35.2, 138.2, 35.4, 138.4)]);
    }

    #[test]
    fn test_quadrants_prefer_integer_cut() {
        let quads = BoundingBox::new(35.2, 138.2, 36.0, 139.8).quadrants();
        // Latitude has no integer inside, so it splits at the midpoint; longitude cuts at 139
        assert_relative_eq!(quads[0].max_lat, 35.6, epsilon = 1e-12);
        assert_eq!(quads[0].max_lon, 139.0);
        for quad in &quads {
            assert_eq!(quad.unit_tiles().len(), 1);
        }
    }

    #[test]
    fn test_lattice_order() {
        let points = BoundingBox::new(0.0, 10.0, 1.0, 11.0).lattice(2);
        assert_eq!(
            points,
            vec![
                GeoPoint::new(0.0, 10.0),
                GeoPoint::new(0.0, 11.0),
                GeoPoint::new(1.0, 10.0),
                GeoPoint::new(1.0, 11.0),
            ]
        );
        let center = BoundingBox::new(0.0, 10.0, 1.0, 11.0).lattice(1);
        assert_eq!(center, vec![GeoPoint::new(0.5, 10.5)]);
    }

    #[test]
    fn test_union_and_padding() {
        let a = BoundingBox::new(35.0, 138.0, 35.5, 138.5);
        let b = BoundingBox::new(35.2, 137.5, 36.0, 138.2);
        let u = a.union(&b);
        assert_eq!(u, BoundingBox::new(35.0, 137.5, 36.0, 138.5));
        assert!(u.contains_box(&a) && u.contains_box(&b));

        let padded = BoundingBox::new(89.99, 179.99, 90.0, 180.0).padded(0.05);
        assert_eq!(padded.max_lat, 90.0);
        assert_eq!(padded.max_lon, 180.0);
    }
}
