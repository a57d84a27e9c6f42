//! Imagery from a fixed list of mosaics, one per time-step.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tcm_change_models::{TimeLabel, TimeSeriesSample};
use tcm_geometry_models::{GeometryRecord, RegionShapes};

use crate::{GeoRaster, ImageryError, ImagerySource, PixelPolicy, RasterCache};

/// One configured time-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticStep {
    /// Label, e.g. `"2016"` or `"2018-06-03"`.
    pub label: TimeLabel,
    /// Raster path; its world file sits next to it.
    pub path: PathBuf,
}

/// Settings for [`StaticFileImagery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticFilesConfig {
    /// Time-steps, in any order.
    pub steps: Vec<StaticStep>,
    /// Pixel handling.
    #[serde(default)]
    pub pixels: PixelPolicy,
}

/// Reads every configured mosaic for every geometry. A mosaic that does
/// not overlap a geometry's neighborhood contributes no time-step.
pub struct StaticFileImagery {
    config: StaticFilesConfig,
    cache: RasterCache,
}

impl StaticFileImagery {
    /// Creates the source.
    #[must_use]
    pub fn new(config: StaticFilesConfig) -> Self {
        let cache = RasterCache::new(config.steps.len().max(1));
        Self { config, cache }
    }
}

impl ImagerySource for StaticFileImagery {
    fn get_series(
        &mut self,
        record: &GeometryRecord,
        shapes: &RegionShapes,
    ) -> Result<TimeSeriesSample, ImageryError> {
        let mut steps = Vec::with_capacity(self.config.steps.len());
        for step in &self.config.steps {
            let raster = match self.cache.get_or_load(&step.path, GeoRaster::open) {
                Ok(raster) => raster,
                Err(e) => {
                    log::warn!(
                        "Geometry {}: skipping {} ({}): {e}",
                        record.id,
                        step.label,
                        step.path.display()
                    );
                    continue;
                }
            };
            match raster.extract(step.label, shapes, &self.config.pixels) {
                Ok(Some(extracted)) => steps.push(extracted),
                Ok(None) => {}
                Err(e) => log::warn!("Geometry {}: dropping {}: {e}", record.id, step.label),
            }
        }
        Ok(TimeSeriesSample::new(steps))
    }
}
