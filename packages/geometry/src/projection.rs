//! Geographic -> projected coordinate transforms backed by `proj4rs`.

use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::{proj::Proj as Proj4, transform::transform};

use crate::GeometryError;

/// PROJ.4 definition of the geographic CRS geometry sources are read in.
pub const GEOGRAPHIC_CRS: &str = "+proj=longlat +datum=WGS84 +no_defs +type=crs";

/// Default imagery CRS: UTM zone 10N on NAD83 (EPSG:26910), which covers
/// the San Jose / Berkeley NAIP mosaics.
pub const DEFAULT_TARGET_CRS: &str = "+proj=utm +zone=10 +datum=NAD83 +units=m +no_defs +type=crs";

/// A reusable transform from one CRS to another.
///
/// Geographic endpoints are handled in degrees at the API boundary;
/// `proj4rs` itself works in radians.
pub struct Projection {
    from: Proj4,
    to: Proj4,
    from_geographic: bool,
    to_geographic: bool,
}

impl Projection {
    /// Builds a transform between two PROJ.4 definitions.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidCrs`] if either definition cannot be
    /// parsed.
    pub fn new(source: &str, target: &str) -> Result<Self, GeometryError> {
        Ok(Self {
            from: parse_proj(source)?,
            to: parse_proj(target)?,
            from_geographic: is_geographic(source),
            to_geographic: is_geographic(target),
        })
    }

    /// Builds a transform from [`GEOGRAPHIC_CRS`] to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidCrs`] if `target` cannot be parsed.
    pub fn from_geographic(target: &str) -> Result<Self, GeometryError> {
        Self::new(GEOGRAPHIC_CRS, target)
    }

    /// Transforms a single coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Projection`] if `proj4rs` rejects the point
    /// (e.g. a latitude outside the projection's domain).
    pub fn project_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
        let mut point = if self.from_geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };

        transform(&self.from, &self.to, &mut point)
            .map_err(|e| GeometryError::Projection(format!("{e:?}")))?;

        if !point.0.is_finite() || !point.1.is_finite() {
            return Err(GeometryError::Projection(format!(
                "non-finite result for ({}, {})",
                coord.x, coord.y
            )));
        }

        Ok(if self.to_geographic {
            Coord {
                x: point.0.to_degrees(),
                y: point.1.to_degrees(),
            }
        } else {
            Coord {
                x: point.0,
                y: point.1,
            }
        })
    }

    /// Transforms every vertex of `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Projection`] on the first vertex that fails.
    pub fn project(&self, shape: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
        shape.try_map_coords(|coord| self.project_coord(coord))
    }
}

fn parse_proj(definition: &str) -> Result<Proj4, GeometryError> {
    Proj4::from_proj_string(definition).map_err(|e| GeometryError::InvalidCrs {
        definition: definition.to_string(),
        message: format!("{e:?}"),
    })
}

fn is_geographic(definition: &str) -> bool {
    definition.contains("+proj=longlat") || definition.contains("+proj=latlong")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_san_jose_into_utm_meters() {
        let projection = Projection::from_geographic(DEFAULT_TARGET_CRS).unwrap();
        let projected = projection
            .project_coord(Coord {
                x: -121.939_786,
                y: 37.364_435,
            })
            .unwrap();

        // Zone 10 easting is within (166km, 834km); northing ~4.1e6 m.
        assert!(projected.x > 500_000.0 && projected.x < 700_000.0, "{projected:?}");
        assert!(projected.y > 4_000_000.0 && projected.y < 4_300_000.0, "{projected:?}");
    }

    #[test]
    fn geographic_round_trip_is_identity() {
        let projection = Projection::new(GEOGRAPHIC_CRS, GEOGRAPHIC_CRS).unwrap();
        let out = projection.project_coord(Coord { x: 10.5, y: -3.25 }).unwrap();
        assert!((out.x - 10.5).abs() < 1e-9);
        assert!((out.y + 3.25).abs() < 1e-9);
    }

    #[test]
    fn rejects_garbage_definition() {
        assert!(matches!(
            Projection::from_geographic("+proj=not_a_projection"),
            Err(GeometryError::InvalidCrs { .. })
        ));
    }
}
