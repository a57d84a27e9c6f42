//! Small most-recently-used cache of decoded rasters.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{GeoRaster, ImageryError};

/// Default number of rasters kept per imagery source.
pub const DEFAULT_CAPACITY: usize = 8;

/// Keeps the last few decoded rasters; neighbouring geometries usually
/// land on the same tiles.
pub struct RasterCache {
    capacity: usize,
    entries: VecDeque<(PathBuf, Arc<GeoRaster>)>,
}

impl Default for RasterCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RasterCache {
    /// Creates a cache holding at most `capacity` rasters (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns the cached raster for `path`, loading it with `load` on a
    /// miss. The returned raster becomes the most recently used.
    ///
    /// # Errors
    ///
    /// Propagates the error from `load`; failed loads are not cached.
    pub fn get_or_load(
        &mut self,
        path: &Path,
        load: impl FnOnce(&Path) -> Result<GeoRaster, ImageryError>,
    ) -> Result<Arc<GeoRaster>, ImageryError> {
        if let Some(position) = self.entries.iter().position(|(p, _)| p == path) {
            if let Some(entry) = self.entries.remove(position) {
                let raster = Arc::clone(&entry.1);
                self.entries.push_front(entry);
                return Ok(raster);
            }
        }

        let raster = Arc::new(load(path)?);
        self.entries.push_front((path.to_path_buf(), Arc::clone(&raster)));
        self.entries.truncate(self.capacity);
        Ok(raster)
    }

    /// Number of cached rasters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use ndarray::Array3;

    use super::*;
    use crate::world_file::GeoTransform;

    fn dummy(_: &Path) -> Result<GeoRaster, ImageryError> {
        Ok(GeoRaster::new(
            Array3::zeros((1, 1, 1)),
            GeoTransform::north_up(0.0, 0.0, 1.0, 1.0),
        ))
    }

    #[test]
    fn hits_skip_the_loader_and_evict_least_recent() {
        let loads = Cell::new(0);
        let mut cache = RasterCache::new(2);
        let mut get = |name: &str| {
            cache
                .get_or_load(Path::new(name), |p| {
                    loads.set(loads.get() + 1);
                    dummy(p)
                })
                .unwrap();
        };

        get("a");
        get("b");
        get("a");
        assert_eq!(loads.get(), 2);

        // "b" is now least recently used and gets evicted.
        get("c");
        get("a");
        assert_eq!(loads.get(), 3);
        get("b");
        assert_eq!(loads.get(), 4);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let mut cache = RasterCache::default();
        let result = cache.get_or_load(Path::new("x"), |p| {
            Err(ImageryError::WorldFile {
                path: p.to_path_buf(),
                message: "missing".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
