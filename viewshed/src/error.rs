//! Error types for the viewshed library.

use std::path::PathBuf;
use thiserror::Error;

use crate::elevation::ResolutionProduct;
use crate::geo::BoundingBox;

/// Errors that can occur while fetching terrain or evaluating visibility.
#[derive(Error, Debug)]
pub enum ViewshedError {
    /// IO error when reading or writing cache files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File size doesn't match SRTM1 or SRTM3 format.
    #[error("Invalid tile size: {size} bytes in {path} (expected an SRTM1 or SRTM3 tile)")]
    InvalidFileSize { path: PathBuf, size: usize },

    /// A caller-supplied parameter is out of range. Raised before any download starts.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Terrain coverage for a bounding box could not be obtained.
    #[error("Coverage unavailable for {product} over {bounds}: {reason}")]
    CoverageUnavailable {
        product: ResolutionProduct,
        bounds: BoundingBox,
        reason: String,
    },

    /// An upstream fetch exceeded its time budget.
    #[error("Timed out after {timeout_secs}s fetching {url}")]
    Timeout { url: String, timeout_secs: u64 },

    /// The upstream refused a request because it spans too many unit tiles.
    #[error("Request spans {requested} tiles, upstream limit is {limit}")]
    TileLimitExceeded { requested: usize, limit: usize },

    /// A single unit tile could not be fetched.
    #[error("Failed to fetch {filename}: {reason}")]
    DownloadFailed { filename: String, reason: String },

    /// The coverage manifest could not be parsed or written.
    #[error("Manifest error in {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The observer's own ground elevation is missing, so no viewshed can be anchored.
    #[error("No ground elevation at observer ({lat}, {lon})")]
    ObserverElevationUnavailable { lat: f64, lon: f64 },

    /// The caller cancelled a long-running computation.
    #[error("Computation cancelled")]
    Cancelled,
}

impl ViewshedError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        ViewshedError::InvalidInput {
            message: message.into(),
        }
    }

    /// Returns `true` for failures that mean terrain could not be obtained at all.
    pub fn is_coverage_failure(&self) -> bool {
        matches!(
            self,
            ViewshedError::CoverageUnavailable { .. } | ViewshedError::Timeout { .. }
        )
    }
}

/// Result type alias using [`ViewshedError`].
pub type Result<T> = std::result::Result<T, ViewshedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ViewshedError::InvalidFileSize {
            path: PathBuf::from("N35E138.hgt"),
            size: 1000,
        };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("N35E138.hgt"));

        let err = ViewshedError::CoverageUnavailable {
            product: ResolutionProduct::High,
            bounds: BoundingBox::new(35.0, 138.0, 36.0, 139.0),
            reason: "HTTP 503".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("SRTM1"));
        assert!(msg.contains("HTTP 503"));

        let err = ViewshedError::TileLimitExceeded {
            requested: 16,
            limit: 9,
        };
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_coverage_failure_kinds() {
        let timeout = ViewshedError::Timeout {
            url: "https://example.com/N35E138.hgt".to_string(),
            timeout_secs: 30,
        };
        assert!(timeout.is_coverage_failure());
        assert!(!ViewshedError::Cancelled.is_coverage_failure());
        assert!(!ViewshedError::invalid_input("radius").is_coverage_failure());
    }
}
