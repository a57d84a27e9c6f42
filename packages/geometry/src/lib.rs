#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry handling for footprint change detection.
//!
//! - [`region`] derives the neighborhood, mask, and superres shapes for a
//!   footprint and reprojects them into the imagery CRS.
//! - [`projection`] wraps `proj4rs` for geographic -> projected transforms.
//! - [`source`] loads [`GeometryRecord`]s from a `GeoJSON` feature
//!   collection, including the parcel and parcel-dedup variants.

pub mod projection;
pub mod region;
pub mod source;

pub use projection::{DEFAULT_TARGET_CRS, GEOGRAPHIC_CRS, Projection};
pub use region::{RegionBuilder, SUPERRES_MARGIN_DEGREES};
pub use source::{load_geometries, parse_geometries};
pub use tcm_geometry_models::{GeometryId, GeometryRecord, ParcelMode, RegionShapes};

use thiserror::Error;

/// Errors from geometry derivation and loading.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// A PROJ.4 definition could not be parsed.
    #[error("Invalid CRS definition '{definition}': {message}")]
    InvalidCrs {
        /// The offending PROJ.4 string.
        definition: String,
        /// Message from `proj4rs`.
        message: String,
    },

    /// A coordinate could not be transformed between CRSs.
    #[error("Projection failed: {0}")]
    Projection(String),

    /// The footprint has no coordinates, so no envelope exists.
    #[error("Footprint has no coordinates")]
    EmptyFootprint,

    /// Reading the geometry source failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The geometry source is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// A parcel property could not be decoded as a `GeoJSON` geometry.
    #[error("Invalid parcel geometry: {0}")]
    Parcel(#[from] serde_json::Error),

    /// The geometry source is `GeoJSON`, but not features.
    #[error("Expected a GeoJSON FeatureCollection or Feature")]
    NotFeatures,
}
