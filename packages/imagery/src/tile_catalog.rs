//! Imagery from a catalog of tiles resolved through the shared tile index.
//!
//! Tile ids are `/`-separated relative paths such as
//! `v002/ca/2016/ca_060cm_2016/37122/m_3712201_ne_10_060_20160713.tif`,
//! with a region segment (`ca`) and a year segment (`2016`).

use std::path::PathBuf;

use geo::Centroid;
use serde::{Deserialize, Serialize};
use tcm_change_models::{TimeLabel, TimeSeriesSample};
use tcm_geometry_models::{GeometryRecord, RegionShapes};
use tcm_tile_index::{BoundingBox, ClientConfig, TileIndexClient};

use crate::{GeoRaster, ImageryError, ImagerySource, PixelPolicy, RasterCache};

const fn default_region_segment() -> usize {
    1
}

const fn default_year_segment() -> usize {
    2
}

/// Settings for [`TileCatalogImagery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileCatalogConfig {
    /// Directory tile ids are relative to.
    pub root: PathBuf,
    /// Index of the id segment naming the region.
    #[serde(default = "default_region_segment")]
    pub region_segment: usize,
    /// Index of the id segment holding the year.
    #[serde(default = "default_year_segment")]
    pub year_segment: usize,
    /// Pixel handling.
    #[serde(default)]
    pub pixels: PixelPolicy,
}

/// Picks one tile per year from the ids covering a point.
///
/// Ids are sorted first. Only ids in the same region as the first one are
/// kept, ids whose year segment is not a number are dropped, and for each
/// year the first remaining id wins. The result is in ascending year
/// order.
#[must_use]
pub fn select_tiles(ids: &[String], region_segment: usize, year_segment: usize) -> Vec<(TimeLabel, String)> {
    let mut sorted: Vec<&String> = ids.iter().collect();
    sorted.sort();

    let Some(region) = sorted
        .first()
        .copied()
        .and_then(|id| id.split('/').nth(region_segment))
    else {
        return Vec::new();
    };

    let mut selected: Vec<(i32, String)> = Vec::new();
    for id in sorted {
        let mut segments = id.split('/');
        if segments.clone().nth(region_segment) != Some(region) {
            continue;
        }
        let Some(year) = segments.nth(year_segment).and_then(|s| s.parse::<i32>().ok()) else {
            log::debug!("Ignoring tile {id}: no year in segment {year_segment}");
            continue;
        };
        if selected.iter().all(|(y, _)| *y != year) {
            selected.push((year, id.clone()));
        }
    }

    selected.sort_by_key(|(year, _)| *year);
    selected
        .into_iter()
        .map(|(year, id)| (TimeLabel::Year(year), id))
        .collect()
}

/// NAIP-style imagery: one tile per survey year, found by asking the tile
/// index which tiles cover the footprint centroid.
pub struct TileCatalogImagery {
    config: TileCatalogConfig,
    client: TileIndexClient,
    cache: RasterCache,
}

impl TileCatalogImagery {
    /// Creates the source with its own tile index client.
    ///
    /// # Errors
    ///
    /// Returns an error if the tile index client cannot be built.
    pub fn new(config: TileCatalogConfig, tile_index: &ClientConfig) -> Result<Self, ImageryError> {
        Ok(Self {
            config,
            client: TileIndexClient::new(tile_index)?,
            cache: RasterCache::default(),
        })
    }
}

impl ImagerySource for TileCatalogImagery {
    fn get_series(
        &mut self,
        record: &GeometryRecord,
        shapes: &RegionShapes,
    ) -> Result<TimeSeriesSample, ImageryError> {
        let centroid = record.footprint.centroid().ok_or(ImageryError::EmptyFootprint)?;
        let ids = self
            .client
            .intersection(BoundingBox::point(centroid.x(), centroid.y()))?;

        let tiles = select_tiles(&ids, self.config.region_segment, self.config.year_segment);
        log::trace!("Geometry {}: {} covering tiles, {} years", record.id, ids.len(), tiles.len());

        let mut steps = Vec::with_capacity(tiles.len());
        for (label, id) in tiles {
            let path = self.config.root.join(&id);
            let raster = match self.cache.get_or_load(&path, GeoRaster::open) {
                Ok(raster) => raster,
                Err(e) => {
                    log::warn!("Geometry {}: skipping {label} tile {id}: {e}", record.id);
                    continue;
                }
            };
            match raster.extract(label, shapes, &self.config.pixels) {
                Ok(Some(step)) => steps.push(step),
                Ok(None) => log::debug!("Geometry {}: tile {id} does not cover the neighborhood", record.id),
                Err(e) => log::warn!("Geometry {}: dropping {label} tile {id}: {e}", record.id),
            }
        }

        Ok(TimeSeriesSample::new(steps))
    }
}
