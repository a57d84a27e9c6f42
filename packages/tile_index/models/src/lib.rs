#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tile coverage entries and request/response types for the tile index
//! service.
//!
//! These types are serialized to JSON on the wire between workers and the
//! index server.

use serde::{Deserialize, Serialize};

/// An axis-aligned box in geographic coordinates (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western boundary (minimum longitude).
    pub min_x: f64,
    /// Southern boundary (minimum latitude).
    pub min_y: f64,
    /// Eastern boundary (maximum longitude).
    pub max_x: f64,
    /// Northern boundary (maximum latitude).
    pub max_y: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// A degenerate box covering a single point.
    #[must_use]
    pub const fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    /// Whether every coordinate is finite and the minimums do not exceed
    /// the maximums. Point boxes are valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }
}

/// One imagery tile and the area it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileCoverageEntry {
    /// Tile identifier, usually a relative path like `v002/ca/2016/ca_060cm_2016/37122/m_3712201_ne_10_060_20160713.tif`.
    pub tile_id: String,
    /// Coverage of the tile.
    pub bbox: BoundingBox,
}

/// Body of `POST /add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRequest {
    /// Tile identifier.
    pub id: String,
    /// Coverage of the tile.
    pub bbox: BoundingBox,
}

/// Body of `POST /intersection`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntersectionRequest {
    /// Query box; use [`BoundingBox::point`] for containment queries.
    pub bbox: BoundingBox,
}

/// Response of `POST /intersection`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionResponse {
    /// Ids of every entry intersecting the query box, sorted ascending.
    pub ids: Vec<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Number of entries in the index.
    pub entries: usize,
}

/// Error body returned alongside non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable message.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_boxes_are_valid() {
        assert!(BoundingBox::point(5.0, 5.0).is_valid());
    }

    #[test]
    fn inverted_and_non_finite_boxes_are_invalid() {
        assert!(!BoundingBox::new(10.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!BoundingBox::new(0.0, f64::NAN, 1.0, 1.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f64::INFINITY, 1.0).is_valid());
    }

    #[test]
    fn add_request_wire_shape() {
        let json = serde_json::to_value(AddRequest {
            id: "t1".to_string(),
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "t1",
                "bbox": {"min_x": 0.0, "min_y": 0.0, "max_x": 10.0, "max_y": 10.0}
            })
        );
    }
}
