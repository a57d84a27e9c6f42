#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Imagery sources.
//!
//! An [`ImagerySource`] turns a geometry and its projected
//! [`RegionShapes`] into a [`TimeSeriesSample`]: one cropped pixel grid per
//! available time-step, with occupancy and footprint masks. Backends are
//! selected by the `kind` tag of [`ImageryConfig`]:
//!
//! - `tile_catalog`: tiles resolved per geometry through the shared tile
//!   index, one per year ([`TileCatalogImagery`]).
//! - `static_files`: a fixed list of mosaics ([`StaticFileImagery`]).
//!
//! Rasters are read with the `image` crate and georeferenced with an ESRI
//! world file next to each image.

pub mod cache;
pub mod raster;
pub mod static_files;
pub mod tile_catalog;
pub mod world_file;

use std::path::PathBuf;

pub use cache::RasterCache;
pub use raster::{GeoRaster, NoDataPolicy, PixelPolicy};
pub use static_files::{StaticFileImagery, StaticFilesConfig, StaticStep};
pub use tile_catalog::{TileCatalogConfig, TileCatalogImagery, select_tiles};
pub use world_file::GeoTransform;

use serde::{Deserialize, Serialize};
use tcm_change_models::TimeSeriesSample;
use tcm_geometry_models::{GeometryRecord, RegionShapes};
use tcm_tile_index::{ClientConfig, TileIndexError};
use thiserror::Error;

/// Errors from reading imagery for a geometry.
#[derive(Debug, Error)]
pub enum ImageryError {
    /// The tile index could not be queried.
    #[error("Tile index error: {0}")]
    TileIndex(#[from] TileIndexError),

    /// A raster or world file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A raster could not be decoded.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// A raster has no usable world file.
    #[error("World file for {}: {message}", path.display())]
    WorldFile {
        /// Raster or world file path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Decoded pixels did not fit the expected grid.
    #[error("Pixel grid error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// A selected band does not exist.
    #[error("Band {band} selected but raster has {bands} bands")]
    BandOutOfRange {
        /// Requested band index.
        band: usize,
        /// Bands available.
        bands: usize,
    },

    /// An extracted time-step was inconsistent.
    #[error("Invalid time-step: {0}")]
    Step(String),

    /// The footprint has no centroid.
    #[error("Footprint is empty")]
    EmptyFootprint,

    /// A tile catalog backend was configured without a tile index.
    #[error("The tile_catalog imagery backend requires a tile index")]
    MissingTileIndex,
}

impl ImageryError {
    /// Whether the tile index service was unreachable, as opposed to the
    /// data for this geometry being bad.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::TileIndex(e) if e.is_connectivity())
    }
}

/// Produces the imagery time series for one geometry at a time.
///
/// Implementations return steps in ascending label order, mark uncovered
/// pixels through the occupancy mask, and omit time-steps that are
/// entirely unavailable.
pub trait ImagerySource {
    /// Reads every available time-step for `record`.
    ///
    /// # Errors
    ///
    /// Returns an error if imagery for the geometry cannot be resolved at
    /// all, for example when the tile index is unreachable.
    fn get_series(
        &mut self,
        record: &GeometryRecord,
        shapes: &RegionShapes,
    ) -> Result<TimeSeriesSample, ImageryError>;
}

/// Which imagery backend to use, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageryConfig {
    /// Tiles resolved through the tile index.
    TileCatalog(TileCatalogConfig),
    /// A fixed mosaic per time-step.
    StaticFiles(StaticFilesConfig),
}

impl ImageryConfig {
    /// Whether this backend needs a tile index connection.
    #[must_use]
    pub const fn requires_tile_index(&self) -> bool {
        matches!(self, Self::TileCatalog(_))
    }
}

/// A configured imagery backend.
pub enum Imagery {
    /// See [`TileCatalogImagery`].
    TileCatalog(TileCatalogImagery),
    /// See [`StaticFileImagery`].
    StaticFiles(StaticFileImagery),
}

impl Imagery {
    /// Builds the backend described by `config`. Each call creates its own
    /// tile index client and raster cache.
    ///
    /// # Errors
    ///
    /// Returns [`ImageryError::MissingTileIndex`] if a tile catalog backend
    /// is configured without `tile_index`, or an error if the client
    /// cannot be built.
    pub fn from_config(
        config: &ImageryConfig,
        tile_index: Option<&ClientConfig>,
    ) -> Result<Self, ImageryError> {
        Ok(match config {
            ImageryConfig::TileCatalog(catalog) => {
                let tile_index = tile_index.ok_or(ImageryError::MissingTileIndex)?;
                Self::TileCatalog(TileCatalogImagery::new(catalog.clone(), tile_index)?)
            }
            ImageryConfig::StaticFiles(files) => Self::StaticFiles(StaticFileImagery::new(files.clone())),
        })
    }
}

impl ImagerySource for Imagery {
    fn get_series(
        &mut self,
        record: &GeometryRecord,
        shapes: &RegionShapes,
    ) -> Result<TimeSeriesSample, ImageryError> {
        match self {
            Self::TileCatalog(source) => source.get_series(record, shapes),
            Self::StaticFiles(source) => source.get_series(record, shapes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_backends_from_toml() {
        let catalog: ImageryConfig = toml::from_str(
            r#"
            kind = "tile_catalog"
            root = "/data/naip"

            [pixels]
            bands = [0, 1, 2]

            [pixels.no_data]
            band_count = 4
            "#,
        )
        .unwrap();
        let ImageryConfig::TileCatalog(catalog) = catalog else {
            panic!("expected tile_catalog");
        };
        assert_eq!(catalog.region_segment, 1);
        assert_eq!(catalog.year_segment, 2);
        assert_eq!(catalog.pixels.bands, Some(vec![0, 1, 2]));
        assert_eq!(catalog.pixels.no_data.band_count, Some(4));
        assert!(catalog.pixels.no_data.sentinel.abs() < f32::EPSILON);

        let files: ImageryConfig = toml::from_str(
            r#"
            kind = "static_files"

            [[steps]]
            label = "2016"
            path = "mosaic_2016.tif"

            [[steps]]
            label = "2018-06-03"
            path = "mosaic_2018.tif"
            "#,
        )
        .unwrap();
        assert!(!files.requires_tile_index());
        let ImageryConfig::StaticFiles(files) = files else {
            panic!("expected static_files");
        };
        assert_eq!(files.steps.len(), 2);
    }

    #[test]
    fn tile_catalog_requires_tile_index() {
        let config = ImageryConfig::TileCatalog(TileCatalogConfig {
            root: PathBuf::from("/data"),
            region_segment: 1,
            year_segment: 2,
            pixels: PixelPolicy::default(),
        });
        assert!(matches!(
            Imagery::from_config(&config, None),
            Err(ImageryError::MissingTileIndex)
        ));
        assert!(Imagery::from_config(&config, Some(&ClientConfig::default())).is_ok());
    }

    #[test]
    fn only_tile_index_failures_are_connectivity() {
        assert!(ImageryError::TileIndex(TileIndexError::Unauthorized).is_connectivity());
        assert!(!ImageryError::EmptyFootprint.is_connectivity());
        assert!(
            !ImageryError::TileIndex(TileIndexError::InvalidBoundingBox { id: "t".to_string() })
                .is_connectivity()
        );
    }
}
