//! Georeferenced rasters and per-geometry pixel extraction.

use std::path::Path;

use geo::{BoundingRect, Coord, Intersects, MultiPolygon, Point};
use image::{DynamicImage, ImageBuffer, Pixel};
use ndarray::{Array2, Array3, ArrayView1, s};
use serde::{Deserialize, Serialize};
use tcm_change_models::{TimeLabel, TimeStep};
use tcm_geometry_models::RegionShapes;

use crate::{ImageryError, world_file::GeoTransform};

/// When a pixel counts as "no data".
///
/// A pixel is no-data when its first `band_count` bands (all bands when
/// unset) all equal `sentinel`. NAIP mosaics, for example, fill uncovered
/// areas with zeros in all four bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoDataPolicy {
    /// Fill value.
    pub sentinel: f32,
    /// How many leading bands must equal the sentinel.
    pub band_count: Option<usize>,
}

impl Default for NoDataPolicy {
    fn default() -> Self {
        Self {
            sentinel: 0.0,
            band_count: None,
        }
    }
}

impl NoDataPolicy {
    /// Whether `pixel` is fill rather than imagery.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_no_data(&self, pixel: ArrayView1<'_, f32>) -> bool {
        let bands = self.band_count.unwrap_or(pixel.len()).min(pixel.len());
        bands > 0 && pixel.iter().take(bands).all(|v| *v == self.sentinel)
    }
}

/// How raster pixels are turned into time-step pixels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelPolicy {
    /// No-data detection, applied to the full pixel.
    pub no_data: NoDataPolicy,
    /// Bands to keep, in order; all bands when unset.
    pub bands: Option<Vec<usize>>,
}

/// A decoded raster and its georeferencing.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRaster {
    data: Array3<f32>,
    transform: GeoTransform,
}

fn buffer_to_array<P>(buffer: &ImageBuffer<P, Vec<P::Subpixel>>) -> Result<Array3<f32>, ImageryError>
where
    P: Pixel,
    P::Subpixel: Into<f32>,
{
    let (width, height) = buffer.dimensions();
    let shape = (
        height as usize,
        width as usize,
        usize::from(P::CHANNEL_COUNT),
    );
    let values = buffer.as_raw().iter().map(|v| (*v).into()).collect();
    Ok(Array3::from_shape_vec(shape, values)?)
}

impl GeoRaster {
    /// Wraps already-decoded `height x width x bands` data.
    #[must_use]
    pub const fn new(data: Array3<f32>, transform: GeoTransform) -> Self {
        Self { data, transform }
    }

    /// Decodes the raster at `path` and reads its world file.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be decoded or has no valid
    /// world file.
    pub fn open(path: &Path) -> Result<Self, ImageryError> {
        let transform = GeoTransform::read_for(path)?;
        let data = match image::open(path)? {
            DynamicImage::ImageLuma8(b) => buffer_to_array(&b)?,
            DynamicImage::ImageLumaA8(b) => buffer_to_array(&b)?,
            DynamicImage::ImageRgb8(b) => buffer_to_array(&b)?,
            DynamicImage::ImageRgba8(b) => buffer_to_array(&b)?,
            DynamicImage::ImageLuma16(b) => buffer_to_array(&b)?,
            DynamicImage::ImageLumaA16(b) => buffer_to_array(&b)?,
            DynamicImage::ImageRgb16(b) => buffer_to_array(&b)?,
            DynamicImage::ImageRgba16(b) => buffer_to_array(&b)?,
            DynamicImage::ImageRgb32F(b) => buffer_to_array(&b)?,
            DynamicImage::ImageRgba32F(b) => buffer_to_array(&b)?,
            other => buffer_to_array(&other.to_rgba32f())?,
        };
        log::debug!("Opened raster {} {:?}", path.display(), data.dim());
        Ok(Self { data, transform })
    }

    /// `(height, width, bands)`.
    #[must_use]
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Inclusive pixel ranges whose centres fall in `shape`'s bounding
    /// box, or `None` when the box misses the raster.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn window(&self, shape: &MultiPolygon<f64>) -> Option<((usize, usize), (usize, usize))> {
        let rect = shape.bounding_rect()?;
        let (height, width, _) = self.data.dim();
        if height == 0 || width == 0 {
            return None;
        }

        let corners = [
            rect.min(),
            rect.max(),
            Coord {
                x: rect.min().x,
                y: rect.max().y,
            },
            Coord {
                x: rect.max().x,
                y: rect.min().y,
            },
        ]
        .map(|corner| self.transform.to_pixel(corner));

        let (mut min_row, mut max_row) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_col, mut max_col) = (f64::INFINITY, f64::NEG_INFINITY);
        for (row, col) in corners {
            min_row = min_row.min(row);
            max_row = max_row.max(row);
            min_col = min_col.min(col);
            max_col = max_col.max(col);
        }

        let row_start = min_row.ceil().max(0.0);
        let row_end = max_row.floor().min((height - 1) as f64);
        let col_start = min_col.ceil().max(0.0);
        let col_end = max_col.floor().min((width - 1) as f64);
        if row_start > row_end || col_start > col_end {
            return None;
        }

        Some((
            (row_start as usize, row_end as usize),
            (col_start as usize, col_end as usize),
        ))
    }

    /// Crops the window around `shapes.neighborhood` into a time-step.
    ///
    /// Returns `Ok(None)` when the raster does not overlap the
    /// neighborhood at all; the time-step is then unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`ImageryError::BandOutOfRange`] if the policy selects a
    /// band the raster does not have.
    pub fn extract(
        &self,
        label: TimeLabel,
        shapes: &RegionShapes,
        policy: &PixelPolicy,
    ) -> Result<Option<TimeStep>, ImageryError> {
        let Some(((row_start, row_end), (col_start, col_end))) = self.window(&shapes.neighborhood)
        else {
            return Ok(None);
        };

        let bands = self.data.dim().2;
        let selected: Vec<usize> = policy
            .bands
            .clone()
            .unwrap_or_else(|| (0..bands).collect());
        if let Some(&band) = selected.iter().find(|&&band| band >= bands) {
            return Err(ImageryError::BandOutOfRange { band, bands });
        }

        let height = row_end - row_start + 1;
        let width = col_end - col_start + 1;
        let mut pixels = Array3::<f32>::zeros((height, width, selected.len()));
        let mut valid = Array2::from_elem((height, width), false);
        let mut footprint = Array2::from_elem((height, width), false);

        for row in 0..height {
            for col in 0..width {
                let (src_row, src_col) = (row_start + row, col_start + col);
                let source = self.data.slice(s![src_row, src_col, ..]);
                for (target, &band) in selected.iter().enumerate() {
                    pixels[[row, col, target]] = source[band];
                }

                let centre = Point::from(self.transform.pixel_center(src_row, src_col));
                if !shapes.neighborhood.intersects(&centre) {
                    continue;
                }
                footprint[[row, col]] = !shapes.mask.intersects(&centre);
                valid[[row, col]] = !policy.no_data.is_no_data(source);
            }
        }

        TimeStep::new(label, pixels, valid, footprint)
            .map(Some)
            .map_err(ImageryError::Step)
    }
}

#[cfg(test)]
mod tests {
    use geo::polygon;
    use ndarray::array;

    use super::*;

    fn square(min: f64, max: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
        ]])
    }

    /// 10x10 pixels of 1 map unit; pixel (row, col) is centred at
    /// `(col + 0.5, 9.5 - row)`, so the raster spans `[0, 10]` on both axes.
    fn raster(bands: usize) -> GeoRaster {
        let data = Array3::from_shape_fn((10, 10, bands), |(r, c, b)| {
            (r * 100 + c * 10 + b) as f32 + 1.0
        });
        GeoRaster::new(data, GeoTransform::north_up(0.5, 9.5, 1.0, 1.0))
    }

    /// Footprint `[4, 6]`, neighborhood `[2, 8]`.
    fn shapes() -> RegionShapes {
        let footprint = square(4.0, 6.0);
        let neighborhood = square(2.0, 8.0);
        RegionShapes {
            mask: geo::BooleanOps::difference(&neighborhood, &footprint),
            superres: square(3.9, 6.1),
            footprint,
            neighborhood,
        }
    }

    #[test]
    fn crops_to_neighborhood_and_classifies_pixels() {
        let step = raster(3)
            .extract(TimeLabel::Year(2016), &shapes(), &PixelPolicy::default())
            .unwrap()
            .unwrap();

        // Centres 2.5..=7.5 fall in [2, 8]: six pixels each way.
        assert_eq!(step.pixels.dim(), (6, 6, 3));
        // Centres 4.5 and 5.5 fall in the footprint.
        assert_eq!(step.valid_counts(), (4, 32));
        assert!(step.footprint[[2, 2]] && step.footprint[[3, 3]]);
        assert!(!step.footprint[[0, 0]]);
        // Window starts at raster row 2, col 2.
        assert!((step.pixels[[0, 0, 1]] - 222.0).abs() < f32::EPSILON);
    }

    #[test]
    fn no_data_pixels_are_invalid() {
        let mut data = raster(4).data;
        data.slice_mut(s![4, 4, ..]).fill(0.0);
        data.slice_mut(s![5, 5, ..2]).fill(0.0);
        let raster = GeoRaster::new(data, GeoTransform::north_up(0.5, 9.5, 1.0, 1.0));

        let all_bands = raster
            .extract(TimeLabel::Year(2016), &shapes(), &PixelPolicy::default())
            .unwrap()
            .unwrap();
        assert_eq!(all_bands.valid_counts(), (3, 32));

        let two_bands = PixelPolicy {
            no_data: NoDataPolicy {
                sentinel: 0.0,
                band_count: Some(2),
            },
            bands: None,
        };
        let step = raster
            .extract(TimeLabel::Year(2016), &shapes(), &two_bands)
            .unwrap()
            .unwrap();
        assert_eq!(step.valid_counts(), (2, 32));
    }

    #[test]
    fn band_selection_reorders_and_validates() {
        let policy = PixelPolicy {
            no_data: NoDataPolicy::default(),
            bands: Some(vec![2, 0]),
        };
        let step = raster(4)
            .extract(TimeLabel::Year(2016), &shapes(), &policy)
            .unwrap()
            .unwrap();
        assert_eq!(step.band_count(), 2);
        assert!((step.pixels[[0, 0, 0]] - 223.0).abs() < f32::EPSILON);
        assert!((step.pixels[[0, 0, 1]] - 221.0).abs() < f32::EPSILON);

        let bad = PixelPolicy {
            no_data: NoDataPolicy::default(),
            bands: Some(vec![4]),
        };
        assert!(matches!(
            raster(4).extract(TimeLabel::Year(2016), &shapes(), &bad),
            Err(ImageryError::BandOutOfRange { band: 4, bands: 4 })
        ));
    }

    #[test]
    fn disjoint_raster_yields_no_step() {
        let far = GeoRaster::new(
            Array3::ones((4, 4, 3)),
            GeoTransform::north_up(1000.5, 1003.5, 1.0, 1.0),
        );
        assert!(far
            .extract(TimeLabel::Year(2016), &shapes(), &PixelPolicy::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn no_data_policy_ignores_trailing_bands() {
        let policy = NoDataPolicy {
            sentinel: 255.0,
            band_count: Some(3),
        };
        assert!(policy.is_no_data(array![255.0_f32, 255.0, 255.0, 12.0].view()));
        assert!(!policy.is_no_data(array![255.0_f32, 254.0, 255.0, 255.0].view()));
    }

    #[test]
    fn opens_png_with_world_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        image::RgbImage::from_fn(10, 10, |x, y| image::Rgb([x as u8, y as u8, 7]))
            .save(&path)
            .unwrap();
        std::fs::write(dir.path().join("tile.pgw"), "1\n0\n0\n-1\n0.5\n9.5\n").unwrap();

        let raster = GeoRaster::open(&path).unwrap();
        assert_eq!(raster.dim(), (10, 10, 3));

        let step = raster
            .extract(TimeLabel::Year(2018), &shapes(), &PixelPolicy::default())
            .unwrap()
            .unwrap();
        // Raster row 3, col 5 is window (1, 3): red = x = 5, green = y = 3.
        assert!((step.pixels[[1, 3, 0]] - 5.0).abs() < f32::EPSILON);
        assert!((step.pixels[[1, 3, 1]] - 3.0).abs() < f32::EPSILON);
        assert_eq!(step.valid_counts(), (4, 32));
    }
}
