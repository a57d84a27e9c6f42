//! Geometry source loading.
//!
//! Reads footprints from a `GeoJSON` `FeatureCollection`. Ids come from the
//! feature `id`, then an `id` property, then the feature's position in the
//! collection. In parcel modes the parcel polygon is read from the
//! `parcel` property (a `GeoJSON` geometry object); `parcel_dedup` further
//! merges footprints that share a `parcel_id`.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use geo::{BooleanOps, MultiPolygon};
use geojson::{Feature, GeoJson, feature::Id};
use serde_json::Value;
use tcm_geometry_models::{GeometryId, GeometryRecord, ParcelMode};

use crate::GeometryError;

/// Property holding an explicit geometry id when the feature has none.
pub const ID_PROPERTY: &str = "id";

/// Property holding the parcel polygon (a `GeoJSON` geometry object).
pub const PARCEL_PROPERTY: &str = "parcel";

/// Property grouping footprints into parcels for `parcel_dedup`.
pub const PARCEL_ID_PROPERTY: &str = "parcel_id";

/// Loads geometry records from a `GeoJSON` file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a `GeoJSON`
/// feature collection.
pub fn load_geometries(path: &Path, mode: ParcelMode) -> Result<Vec<GeometryRecord>, GeometryError> {
    let text = std::fs::read_to_string(path)?;
    let records = parse_geometries(&text, mode)?;
    log::info!(
        "Loaded {} geometries from {} ({mode})",
        records.len(),
        path.display()
    );
    Ok(records)
}

/// Parses geometry records from `GeoJSON` text.
///
/// Features that cannot be turned into a record (no polygonal geometry,
/// missing parcel in a parcel mode, an id that cannot be written to the
/// result log, a duplicate id) are skipped with a warning.
///
/// # Errors
///
/// Returns an error if `text` is not valid `GeoJSON` or holds a bare
/// geometry instead of features.
pub fn parse_geometries(text: &str, mode: ParcelMode) -> Result<Vec<GeometryRecord>, GeometryError> {
    let features = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => return Err(GeometryError::NotFeatures),
    };

    let records = match mode {
        ParcelMode::NoParcel | ParcelMode::Parcel => features
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| single_record(index, feature, mode))
            .collect(),
        ParcelMode::ParcelDedup => dedup_by_parcel(&features),
    };

    Ok(drop_unusable_ids(records))
}

fn single_record(index: usize, feature: &Feature, mode: ParcelMode) -> Option<GeometryRecord> {
    let id = feature_id(index, feature);

    let Some(footprint) = feature_footprint(feature) else {
        log::warn!("Skipping geometry {id}: no polygon geometry");
        return None;
    };

    let parcel = if mode.uses_parcel() {
        let Some(parcel) = feature_parcel(feature) else {
            log::warn!("Skipping geometry {id}: missing or invalid '{PARCEL_PROPERTY}' property");
            return None;
        };
        Some(parcel)
    } else {
        None
    };

    Some(GeometryRecord {
        id,
        footprint,
        parcel,
    })
}

/// Merges features sharing a `parcel_id` into one record whose footprint
/// is the union of theirs. Groups keep the order of their first member.
fn dedup_by_parcel(features: &[Feature]) -> Vec<GeometryRecord> {
    let mut groups: Vec<GeometryRecord> = Vec::new();
    let mut positions: HashMap<GeometryId, usize> = HashMap::new();

    for (index, feature) in features.iter().enumerate() {
        let Some(parcel_id) = feature
            .property(PARCEL_ID_PROPERTY)
            .and_then(value_to_id)
        else {
            log::warn!(
                "Skipping feature {index}: missing '{PARCEL_ID_PROPERTY}' property"
            );
            continue;
        };

        let Some(footprint) = feature_footprint(feature) else {
            log::warn!("Skipping feature {index} (parcel {parcel_id}): no polygon geometry");
            continue;
        };

        if let Some(&position) = positions.get(&parcel_id) {
            let group = &mut groups[position];
            group.footprint = group.footprint.union(&footprint);
            continue;
        }

        let Some(parcel) = feature_parcel(feature) else {
            log::warn!(
                "Skipping parcel {parcel_id}: missing or invalid '{PARCEL_PROPERTY}' property"
            );
            continue;
        };

        positions.insert(parcel_id.clone(), groups.len());
        groups.push(GeometryRecord {
            id: parcel_id,
            footprint,
            parcel: Some(parcel),
        });
    }

    groups
}

fn drop_unusable_ids(records: Vec<GeometryRecord>) -> Vec<GeometryRecord> {
    let mut seen = BTreeSet::new();
    records
        .into_iter()
        .filter(|record| {
            if !record.id.is_log_safe() {
                log::warn!("Skipping geometry {:?}: id cannot be written to the result log", record.id);
                return false;
            }
            if !seen.insert(record.id.clone()) {
                log::warn!("Skipping duplicate geometry id {}", record.id);
                return false;
            }
            true
        })
        .collect()
}

fn feature_id(index: usize, feature: &Feature) -> GeometryId {
    match &feature.id {
        Some(Id::String(s)) => s
            .parse()
            .ok()
            .unwrap_or_else(|| GeometryId::Text(s.clone())),
        Some(Id::Number(n)) => n
            .as_i64()
            .map_or_else(|| GeometryId::Text(n.to_string()), GeometryId::Int),
        None => feature
            .property(ID_PROPERTY)
            .and_then(value_to_id)
            .unwrap_or_else(|| GeometryId::Int(i64::try_from(index).unwrap_or(i64::MAX))),
    }
}

fn value_to_id(value: &Value) -> Option<GeometryId> {
    match value {
        Value::Number(n) => Some(
            n.as_i64()
                .map_or_else(|| GeometryId::Text(n.to_string()), GeometryId::Int),
        ),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn feature_footprint(feature: &Feature) -> Option<MultiPolygon<f64>> {
    let geometry = feature.geometry.clone()?;
    to_multipolygon(geo::Geometry::<f64>::try_from(geometry).ok()?)
}

fn feature_parcel(feature: &Feature) -> Option<MultiPolygon<f64>> {
    let value = feature.property(PARCEL_PROPERTY)?;
    let geometry: geojson::Geometry = match serde_json::from_value(value.clone()) {
        Ok(geometry) => geometry,
        Err(e) => {
            log::debug!("{}", GeometryError::Parcel(e));
            return None;
        }
    };
    to_multipolygon(geo::Geometry::<f64>::try_from(geometry).ok()?)
}

/// Accepts `Polygon` and `MultiPolygon`; anything else has no area to
/// compare against a neighborhood.
fn to_multipolygon(geometry: geo::Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        geo::Geometry::MultiPolygon(mp) if !mp.0.is_empty() => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use geo::Area;

    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]
            ]]
        })
    }

    fn collection(features: &[Value]) -> String {
        serde_json::json!({ "type": "FeatureCollection", "features": features }).to_string()
    }

    #[test]
    fn reads_ids_from_feature_property_or_index() {
        let text = collection(&[
            serde_json::json!({"type": "Feature", "id": 17, "geometry": square(0.0, 0.0, 1.0), "properties": {}}),
            serde_json::json!({"type": "Feature", "geometry": square(1.0, 0.0, 1.0), "properties": {"id": "bldg-a"}}),
            serde_json::json!({"type": "Feature", "geometry": square(2.0, 0.0, 1.0), "properties": {}}),
        ]);

        let records = parse_geometries(&text, ParcelMode::NoParcel).unwrap();
        let ids: Vec<GeometryId> = records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(
            ids,
            vec![GeometryId::Int(17), GeometryId::from("bldg-a"), GeometryId::Int(2)]
        );
        assert!(records.iter().all(|r| r.parcel.is_none()));
    }

    #[test]
    fn numeric_string_ids_become_integers_from_either_source() {
        let text = collection(&[
            serde_json::json!({"type": "Feature", "id": "17", "geometry": square(0.0, 0.0, 1.0), "properties": {}}),
            serde_json::json!({"type": "Feature", "geometry": square(1.0, 0.0, 1.0), "properties": {"id": "18"}}),
            serde_json::json!({"type": "Feature", "id": "APN-7", "geometry": square(2.0, 0.0, 1.0), "properties": {}}),
        ]);

        let records = parse_geometries(&text, ParcelMode::NoParcel).unwrap();
        let ids: Vec<GeometryId> = records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(
            ids,
            vec![GeometryId::Int(17), GeometryId::Int(18), GeometryId::from("APN-7")]
        );
    }

    #[test]
    fn skips_non_polygon_and_unsafe_ids() {
        let text = collection(&[
            serde_json::json!({"type": "Feature", "id": 1, "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}, "properties": {}}),
            serde_json::json!({"type": "Feature", "id": "a,b", "geometry": square(0.0, 0.0, 1.0), "properties": {}}),
            serde_json::json!({"type": "Feature", "id": 3, "geometry": square(0.0, 0.0, 1.0), "properties": {}}),
            serde_json::json!({"type": "Feature", "id": 3, "geometry": square(5.0, 0.0, 1.0), "properties": {}}),
        ]);

        let records = parse_geometries(&text, ParcelMode::NoParcel).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, GeometryId::Int(3));
    }

    #[test]
    fn parcel_mode_requires_parcel_property() {
        let text = collection(&[
            serde_json::json!({"type": "Feature", "id": 1, "geometry": square(0.0, 0.0, 1.0),
                "properties": {"parcel": square(-1.0, -1.0, 3.0)}}),
            serde_json::json!({"type": "Feature", "id": 2, "geometry": square(0.0, 0.0, 1.0), "properties": {}}),
        ]);

        let records = parse_geometries(&text, ParcelMode::Parcel).unwrap();
        assert_eq!(records.len(), 1);
        let parcel = records[0].parcel.as_ref().unwrap();
        assert!((parcel.unsigned_area() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn parcel_dedup_unions_footprints_per_parcel() {
        let text = collection(&[
            serde_json::json!({"type": "Feature", "id": 1, "geometry": square(0.0, 0.0, 1.0),
                "properties": {"parcel_id": "APN-7", "parcel": square(-1.0, -1.0, 5.0)}}),
            serde_json::json!({"type": "Feature", "id": 2, "geometry": square(2.0, 2.0, 1.0),
                "properties": {"parcel_id": "APN-7", "parcel": square(-1.0, -1.0, 5.0)}}),
            serde_json::json!({"type": "Feature", "id": 3, "geometry": square(10.0, 10.0, 1.0),
                "properties": {"parcel_id": 99, "parcel": square(9.0, 9.0, 3.0)}}),
        ]);

        let records = parse_geometries(&text, ParcelMode::ParcelDedup).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, GeometryId::from("APN-7"));
        assert!((records[0].footprint.unsigned_area() - 2.0).abs() < 1e-9);
        assert_eq!(records[1].id, GeometryId::Int(99));
        assert!(records.iter().all(|r| r.parcel.is_some()));
    }

    #[test]
    fn empty_collection_is_not_an_error() {
        let records = parse_geometries(&collection(&[]), ParcelMode::NoParcel).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn bare_geometry_is_rejected() {
        let text = square(0.0, 0.0, 1.0).to_string();
        assert!(matches!(
            parse_geometries(&text, ParcelMode::NoParcel),
            Err(GeometryError::NotFeatures)
        ));
    }

    #[test]
    fn loads_from_disk_and_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("footprints.geojson");
        std::fs::write(
            &path,
            collection(&[serde_json::json!({"type": "Feature", "id": 5, "geometry": square(0.0, 0.0, 1.0), "properties": {}})]),
        )
        .unwrap();

        let records = load_geometries(&path, ParcelMode::NoParcel).unwrap();
        assert_eq!(records[0].id, GeometryId::Int(5));

        assert!(matches!(
            load_geometries(&dir.path().join("missing.geojson"), ParcelMode::NoParcel),
            Err(GeometryError::Io(_))
        ));
    }
}
