//! ESRI world files: the six-line affine sidecar next to a raster.
//!
//! Lines are, in order, `A` (x size of a pixel), `D` (row rotation), `B`
//! (column rotation), `E` (y size of a pixel, usually negative), and `C`,
//! `F` (the map coordinates of the centre of the upper-left pixel):
//!
//! ```text
//! x = A * col + B * row + C
//! y = D * col + E * row + F
//! ```

use std::path::{Path, PathBuf};

use geo::Coord;

use crate::ImageryError;

/// Affine transform between pixel indices and map coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    a: f64,
    d: f64,
    b: f64,
    e: f64,
    c: f64,
    f: f64,
}

impl GeoTransform {
    /// A north-up transform: square-ish pixels of `pixel_width` by
    /// `pixel_height` map units, upper-left pixel centred at `(x, y)`.
    #[must_use]
    pub const fn north_up(x: f64, y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            d: 0.0,
            b: 0.0,
            e: -pixel_height,
            c: x,
            f: y,
        }
    }

    /// Parses world-file text.
    ///
    /// # Errors
    ///
    /// Returns a message if there are not exactly six numeric lines or the
    /// transform is singular.
    pub fn parse(text: &str) -> Result<Self, String> {
        let values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<f64>()
                    .map_err(|e| format!("invalid value '{line}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let [a, d, b, e, c, f] = values[..] else {
            return Err(format!("expected 6 values, found {}", values.len()));
        };
        let transform = Self { a, d, b, e, c, f };
        if transform.determinant().abs() < f64::EPSILON || !transform.determinant().is_finite() {
            return Err("transform is singular".to_string());
        }
        Ok(transform)
    }

    /// Finds and parses the world file belonging to `raster`.
    ///
    /// For `tile.png` the candidates are `tile.pgw`, `tile.pngw` and
    /// `tile.wld`, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ImageryError::WorldFile`] if no sidecar exists or it does
    /// not parse.
    pub fn read_for(raster: &Path) -> Result<Self, ImageryError> {
        let Some(path) = sidecar_candidates(raster).into_iter().find(|p| p.is_file()) else {
            return Err(ImageryError::WorldFile {
                path: raster.to_path_buf(),
                message: "no world file found".to_string(),
            });
        };
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text).map_err(|message| ImageryError::WorldFile { path, message })
    }

    fn determinant(&self) -> f64 {
        self.a.mul_add(self.e, -(self.b * self.d))
    }

    /// Map coordinates of the centre of pixel `(row, col)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pixel_center(&self, row: usize, col: usize) -> Coord<f64> {
        let (row, col) = (row as f64, col as f64);
        Coord {
            x: self.a.mul_add(col, self.b.mul_add(row, self.c)),
            y: self.d.mul_add(col, self.e.mul_add(row, self.f)),
        }
    }

    /// Fractional `(row, col)` of a map coordinate; integers are pixel
    /// centres.
    #[must_use]
    pub fn to_pixel(&self, coord: Coord<f64>) -> (f64, f64) {
        let det = self.determinant();
        let dx = coord.x - self.c;
        let dy = coord.y - self.f;
        let col = self.e.mul_add(dx, -(self.b * dy)) / det;
        let row = self.a.mul_add(dy, -(self.d * dx)) / det;
        (row, col)
    }
}

fn sidecar_candidates(raster: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(ext) = raster.extension().and_then(|e| e.to_str()) {
        let mut chars = ext.chars();
        if let (Some(first), Some(last)) = (chars.next(), chars.last()) {
            candidates.push(raster.with_extension(format!("{first}{last}w")));
        }
        candidates.push(raster.with_extension(format!("{ext}w")));
    }
    candidates.push(raster.with_extension("wld"));
    candidates
}
