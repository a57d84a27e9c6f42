//! Region shape derivation.
//!
//! For a footprint the change detector needs three regions: the
//! neighborhood (everything that gets cropped out of the imagery), the
//! mask (neighborhood minus footprint, i.e. the background sample), and a
//! tight superres window around the footprint. Shapes are built in
//! geographic coordinates, where `buffer` is expressed in degrees, and then
//! reprojected into the imagery CRS.

use geo::{BooleanOps, BoundingRect, Coord, MultiPolygon, Rect};
use tcm_geometry_models::RegionShapes;

use crate::{GeometryError, Projection};

/// Margin (degrees) around the footprint envelope for the superres window.
pub const SUPERRES_MARGIN_DEGREES: f64 = 0.0003;

/// Derives [`RegionShapes`] in a fixed projected CRS.
pub struct RegionBuilder {
    projection: Projection,
}

impl RegionBuilder {
    /// Creates a builder that projects into `target_crs` (a PROJ.4 string).
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidCrs`] if `target_crs` is invalid.
    pub fn new(target_crs: &str) -> Result<Self, GeometryError> {
        Ok(Self {
            projection: Projection::from_geographic(target_crs)?,
        })
    }

    /// Derives the mask, neighborhood, and superres shapes for `footprint`.
    ///
    /// With a parcel, the parcel is the neighborhood. Otherwise the
    /// neighborhood is the footprint envelope grown by `buffer` on every
    /// side. A non-positive buffer is allowed: the neighborhood then
    /// collapses onto (or inside) the footprint and the mask may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::EmptyFootprint`] if the footprint has no
    /// coordinates, or [`GeometryError::Projection`] if reprojection fails.
    pub fn derive(
        &self,
        footprint: &MultiPolygon<f64>,
        parcel: Option<&MultiPolygon<f64>>,
        buffer: f64,
    ) -> Result<RegionShapes, GeometryError> {
        let envelope = footprint
            .bounding_rect()
            .ok_or(GeometryError::EmptyFootprint)?;

        let neighborhood = parcel.map_or_else(
            || rect_to_multi(expand_rect(envelope, buffer)),
            Clone::clone,
        );
        let superres = rect_to_multi(expand_rect(envelope, SUPERRES_MARGIN_DEGREES));

        let footprint = self.projection.project(footprint)?;
        let neighborhood = self.projection.project(&neighborhood)?;
        let superres = self.projection.project(&superres)?;
        let mask = neighborhood.difference(&footprint);

        Ok(RegionShapes {
            footprint,
            mask,
            neighborhood,
            superres,
        })
    }
}

/// Grows `rect` by `amount` on every side. A negative amount shrinks it,
/// never past its center.
fn expand_rect(rect: Rect<f64>, amount: f64) -> Rect<f64> {
    let center = rect.center();
    Rect::new(
        Coord {
            x: (rect.min().x - amount).min(center.x),
            y: (rect.min().y - amount).min(center.y),
        },
        Coord {
            x: (rect.max().x + amount).max(center.x),
            y: (rect.max().y + amount).max(center.y),
        },
    )
}

fn rect_to_multi(rect: Rect<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![rect.to_polygon()])
}

#[cfg(test)]
mod tests {
    use geo::{Area, Intersects, Point, polygon};

    use super::*;
    use crate::DEFAULT_TARGET_CRS;

    /// Roughly a 10m x 10m building in San Jose.
    fn footprint() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: -121.940_00, y: 37.364_40),
            (x: -121.939_89, y: 37.364_40),
            (x: -121.939_89, y: 37.364_49),
            (x: -121.940_00, y: 37.364_49),
        ]])
    }

    fn builder() -> RegionBuilder {
        RegionBuilder::new(DEFAULT_TARGET_CRS).unwrap()
    }

    #[test]
    fn neighborhood_contains_footprint_and_mask_excludes_it() {
        let shapes = builder().derive(&footprint(), None, 0.0005).unwrap();

        let footprint_area = shapes.footprint.unsigned_area();
        let neighborhood_area = shapes.neighborhood.unsigned_area();
        assert!(footprint_area > 0.0);
        assert!(neighborhood_area >= footprint_area);

        let overlap = shapes.mask.intersection(&shapes.footprint).unsigned_area();
        assert!(overlap < footprint_area * 1e-6, "overlap {overlap}");

        let expected_mask = neighborhood_area - footprint_area;
        assert!((shapes.mask.unsigned_area() - expected_mask).abs() < expected_mask * 1e-6);
    }

    #[test]
    fn shapes_are_in_projected_meters() {
        let shapes = builder().derive(&footprint(), None, 0.0005).unwrap();
        let rect = shapes.neighborhood.bounding_rect().unwrap();
        assert!(rect.min().x > 500_000.0 && rect.max().x < 700_000.0);
        // 0.001 degrees of longitude across is on the order of 100 m here.
        assert!(rect.width() > 50.0 && rect.width() < 200.0, "{}", rect.width());
    }

    #[test]
    fn parcel_overrides_buffered_neighborhood() {
        let parcel = MultiPolygon::new(vec![polygon![
            (x: -121.940_10, y: 37.364_30),
            (x: -121.939_80, y: 37.364_30),
            (x: -121.939_80, y: 37.364_60),
            (x: -121.940_10, y: 37.364_60),
        ]]);

        let builder = builder();
        let with_parcel = builder.derive(&footprint(), Some(&parcel), 0.01).unwrap();
        let projected_parcel = builder.projection.project(&parcel).unwrap();

        assert_eq!(with_parcel.neighborhood, projected_parcel);
        let parcel_area = projected_parcel.unsigned_area();
        let expected_mask = parcel_area - with_parcel.footprint.unsigned_area();
        assert!((with_parcel.mask.unsigned_area() - expected_mask).abs() < parcel_area * 1e-6);
    }

    #[test]
    fn superres_is_independent_of_parcel_and_buffer() {
        let parcel = MultiPolygon::new(vec![polygon![
            (x: -121.941, y: 37.363),
            (x: -121.938, y: 37.363),
            (x: -121.938, y: 37.366),
            (x: -121.941, y: 37.366),
        ]]);
        let builder = builder();
        let plain = builder.derive(&footprint(), None, 0.0005).unwrap();
        let parceled = builder.derive(&footprint(), Some(&parcel), 0.002).unwrap();
        assert_eq!(plain.superres, parceled.superres);
        assert!(plain.superres.unsigned_area() > plain.footprint.unsigned_area());
    }

    #[test]
    fn zero_buffer_leaves_an_empty_mask() {
        let shapes = builder().derive(&footprint(), None, 0.0).unwrap();
        let footprint_area = shapes.footprint.unsigned_area();
        assert!(shapes.mask.unsigned_area() < footprint_area * 1e-6);
    }

    #[test]
    fn negative_buffer_collapses_without_error() {
        let shapes = builder().derive(&footprint(), None, -1.0).unwrap();
        assert!(shapes.neighborhood.unsigned_area() < 1e-6);
        assert!(shapes.mask.unsigned_area() < 1e-6);
    }

    #[test]
    fn empty_footprint_is_rejected() {
        let empty = MultiPolygon::<f64>::new(vec![]);
        assert!(matches!(
            builder().derive(&empty, None, 0.001),
            Err(GeometryError::EmptyFootprint)
        ));
    }

    #[test]
    fn expand_rect_grows_every_side() {
        let rect = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 2.0, y: 1.0 });
        let grown = expand_rect(rect, 0.5);
        assert_eq!(grown.min(), Coord { x: -0.5, y: -0.5 });
        assert_eq!(grown.max(), Coord { x: 2.5, y: 1.5 });

        let shrunk = expand_rect(rect, -10.0);
        assert_eq!(shrunk.width(), 0.0);
        assert_eq!(shrunk.height(), 0.0);
        assert!(
            rect_to_multi(grown).intersects(&Point::new(1.0, 0.5)),
            "grown rect should still cover the input center"
        );
    }
}
