#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry record and region shape types.
//!
//! A [`GeometryRecord`] is one unit of batch work as loaded from the
//! geometry source (geographic coordinates). [`RegionShapes`] are the
//! projected shapes derived from it, used to decide which raster pixels
//! belong to the footprint and which to its surrounding background.

use std::fmt;
use std::str::FromStr;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Stable identifier of a geometry, as found in the geometry source and
/// written as the first column of the result log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeometryId {
    /// Integer identifier (feature index or numeric feature id).
    Int(i64),
    /// Free-form string identifier (e.g. a parcel number).
    Text(String),
}

impl GeometryId {
    /// Whether this id can be written to the comma-delimited result log
    /// and read back unchanged.
    #[must_use]
    pub fn is_log_safe(&self) -> bool {
        match self {
            Self::Int(_) => true,
            Self::Text(s) => {
                !s.is_empty()
                    && s.trim() == s
                    && !s.contains([',', '|', '\n', '\r'])
                    && s.parse::<i64>().is_err()
            }
        }
    }
}

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for GeometryId {
    type Err = std::convert::Infallible;

    /// Integer-looking strings become [`GeometryId::Int`], everything else
    /// is kept verbatim as [`GeometryId::Text`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<i64>()
            .map_or_else(|_| Self::Text(s.to_string()), Self::Int))
    }
}

impl From<i64> for GeometryId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for GeometryId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// How parcel polygons participate in neighborhood construction.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParcelMode {
    /// Neighborhood is the buffered footprint envelope.
    #[default]
    NoParcel,
    /// Neighborhood is the parcel polygon attached to each footprint.
    Parcel,
    /// Like [`ParcelMode::Parcel`], but footprints sharing a parcel are
    /// merged into a single work item keyed by the parcel id.
    ParcelDedup,
}

impl ParcelMode {
    /// Whether records loaded in this mode carry a parcel polygon.
    #[must_use]
    pub const fn uses_parcel(self) -> bool {
        matches!(self, Self::Parcel | Self::ParcelDedup)
    }
}

/// One geometry to process: a footprint and an optional parcel, both in
/// geographic (lon/lat degree) coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    /// Identifier written to the result log.
    pub id: GeometryId,
    /// Footprint of the object of interest.
    pub footprint: MultiPolygon<f64>,
    /// Parcel polygon overriding the buffered neighborhood.
    pub parcel: Option<MultiPolygon<f64>>,
}

/// Shapes derived from a [`GeometryRecord`], all in one projected CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionShapes {
    /// The footprint itself, reprojected.
    pub footprint: MultiPolygon<f64>,
    /// Neighborhood minus footprint: the background-only region.
    pub mask: MultiPolygon<f64>,
    /// Buffered envelope of the footprint, or the parcel.
    pub neighborhood: MultiPolygon<f64>,
    /// Footprint envelope expanded by a small fixed margin.
    pub superres: MultiPolygon<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_and_text_ids() {
        assert_eq!("42".parse::<GeometryId>().unwrap(), GeometryId::Int(42));
        assert_eq!(
            "APN-001".parse::<GeometryId>().unwrap(),
            GeometryId::Text("APN-001".to_string())
        );
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for id in [GeometryId::Int(-7), GeometryId::from("0421-033")] {
            assert_eq!(id.to_string().parse::<GeometryId>().unwrap(), id);
        }
    }

    #[test]
    fn rejects_ids_that_break_the_log_format() {
        assert!(GeometryId::Int(1).is_log_safe());
        assert!(GeometryId::from("parcel_9").is_log_safe());
        assert!(!GeometryId::from("a,b").is_log_safe());
        assert!(!GeometryId::from("|").is_log_safe());
        assert!(!GeometryId::from("line\nbreak").is_log_safe());
        assert!(!GeometryId::from("").is_log_safe());
        assert!(!GeometryId::from(" padded").is_log_safe());
        // Would be read back as an integer id.
        assert!(!GeometryId::from("12").is_log_safe());
    }

    #[test]
    fn parcel_mode_parses_snake_case() {
        assert_eq!(
            "parcel_dedup".parse::<ParcelMode>().unwrap(),
            ParcelMode::ParcelDedup
        );
        assert_eq!(ParcelMode::NoParcel.to_string(), "no_parcel");
        assert!(!ParcelMode::NoParcel.uses_parcel());
        assert!(ParcelMode::Parcel.uses_parcel());
    }
}
