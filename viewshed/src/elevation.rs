//! Elevation values and resolution products.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ViewshedError;

/// Samples below this are treated as missing even when the source did not flag them.
pub const NO_DATA_FLOOR_M: f64 = -1000.0;

/// Ground elevation in meters above mean sea level, or an explicit absence.
///
/// Absence is never conflated with 0 m. Call sites that want to treat gaps as
/// open water decide so explicitly with [`Elevation::or_sea_level`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Elevation {
    /// Elevation in meters MSL.
    Meters(f64),
    /// No data for this point.
    Absent,
}

impl Elevation {
    /// Classify a raw raster sample against the source's no-data marker.
    pub fn from_sample(raw: i16, nodata: Option<i16>) -> Self {
        if nodata == Some(raw) || (raw as f64) < NO_DATA_FLOOR_M {
            Elevation::Absent
        } else {
            Elevation::Meters(raw as f64)
        }
    }

    /// Returns the elevation in meters, if present.
    pub fn meters(self) -> Option<f64> {
        match self {
            Elevation::Meters(m) => Some(m),
            Elevation::Absent => None,
        }
    }

    /// Returns `true` when no data is available.
    pub fn is_absent(self) -> bool {
        matches!(self, Elevation::Absent)
    }

    /// Substitute sea level (0 m) for missing data; most gaps are open water.
    pub fn or_sea_level(self) -> f64 {
        self.meters().unwrap_or(0.0)
    }

    /// Use `other` when this value is absent.
    pub fn or_else(self, other: impl FnOnce() -> Elevation) -> Elevation {
        match self {
            Elevation::Meters(_) => self,
            Elevation::Absent => other(),
        }
    }
}

/// Named elevation data product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionProduct {
    /// SRTM1: 1 arc-second (~30m) resolution.
    High,
    /// SRTM3: 3 arc-second (~90m) resolution.
    #[default]
    Standard,
    /// High where available, Standard per point otherwise.
    Adaptive,
}

impl ResolutionProduct {
    /// The concrete products that back this one, in query order.
    pub fn tiers(self) -> &'static [ResolutionProduct] {
        match self {
            ResolutionProduct::High => &[ResolutionProduct::High],
            ResolutionProduct::Standard => &[ResolutionProduct::Standard],
            ResolutionProduct::Adaptive => &[ResolutionProduct::High, ResolutionProduct::Standard],
        }
    }

    /// Directory name used in caches and mirrors.
    pub fn dir_name(self) -> &'static str {
        match self {
            ResolutionProduct::High => "SRTM1",
            ResolutionProduct::Standard => "SRTM3",
            ResolutionProduct::Adaptive => "ADAPTIVE",
        }
    }
}

impl fmt::Display for ResolutionProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for ResolutionProduct {
    type Err = ViewshedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" | "srtm1" | "30m" => Ok(ResolutionProduct::High),
            "standard" | "srtm3" | "90m" => Ok(ResolutionProduct::Standard),
            "adaptive" => Ok(ResolutionProduct::Adaptive),
            other => Err(ViewshedError::invalid_input(format!(
                "unknown resolution product '{}' (expected high, standard or adaptive)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sample() {
        assert_eq!(Elevation::from_sample(500, Some(-32768)), Elevation::Meters(500.0));
        assert_eq!(Elevation::from_sample(0, Some(-32768)), Elevation::Meters(0.0));
        assert_eq!(Elevation::from_sample(-32768, Some(-32768)), Elevation::Absent);
        // Below the floor even without a declared marker
        assert_eq!(Elevation::from_sample(-1001, None), Elevation::Absent);
        assert_eq!(Elevation::from_sample(-400, None), Elevation::Meters(-400.0));
    }

    #[test]
    fn test_sea_level_substitution() {
        assert_eq!(Elevation::Absent.or_sea_level(), 0.0);
        assert_eq!(Elevation::Meters(12.5).or_sea_level(), 12.5);
        assert!(Elevation::Absent.is_absent());
        assert_eq!(
            Elevation::Absent.or_else(|| Elevation::Meters(3.0)),
            Elevation::Meters(3.0)
        );
        assert_eq!(
            Elevation::Meters(1.0).or_else(|| Elevation::Meters(3.0)),
            Elevation::Meters(1.0)
        );
    }

    #[test]
    fn test_product_parsing() {
        assert_eq!("high".parse::<ResolutionProduct>().unwrap(), ResolutionProduct::High);
        assert_eq!("SRTM3".parse::<ResolutionProduct>().unwrap(), ResolutionProduct::Standard);
        assert_eq!(
            "Adaptive".parse::<ResolutionProduct>().unwrap(),
            ResolutionProduct::Adaptive
        );
        assert!("lidar".parse::<ResolutionProduct>().is_err());
    }

    #[test]
    fn test_product_tiers() {
        assert_eq!(ResolutionProduct::High.tiers(), &[ResolutionProduct::High]);
        assert_eq!(
            ResolutionProduct::Adaptive.tiers(),
            &[ResolutionProduct::High, ResolutionProduct::Standard]
        );
        assert_eq!(ResolutionProduct::Standard.to_string(), "SRTM3");
    }
}
