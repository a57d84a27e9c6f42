//! R-tree of tile coverage boxes.

use rstar::{AABB, RTree, RTreeObject};
use tcm_tile_index_models::{BoundingBox, TileCoverageEntry};

use crate::TileIndexError;

/// A tile id stored in the R-tree with its coverage envelope.
struct IndexedTile {
    tile_id: String,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedTile {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn to_envelope(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y])
}

/// Spatial index over tile coverage boxes.
///
/// Built once from a catalog with [`TileIndex::from_entries`] and then
/// queried with [`TileIndex::intersection`]. [`TileIndex::add`] inserts one
/// entry at a time for incremental construction.
#[derive(Default)]
pub struct TileIndex {
    tree: RTree<IndexedTile>,
}

impl TileIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-loads entries into a new index.
    ///
    /// # Errors
    ///
    /// Returns [`TileIndexError::InvalidBoundingBox`] for the first entry
    /// whose box is inverted or not finite.
    pub fn from_entries(entries: Vec<TileCoverageEntry>) -> Result<Self, TileIndexError> {
        let tiles = entries
            .into_iter()
            .map(|entry| {
                if entry.bbox.is_valid() {
                    Ok(IndexedTile {
                        envelope: to_envelope(&entry.bbox),
                        tile_id: entry.tile_id,
                    })
                } else {
                    Err(TileIndexError::InvalidBoundingBox { id: entry.tile_id })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tree: RTree::bulk_load(tiles),
        })
    }

    /// Inserts one entry.
    ///
    /// # Errors
    ///
    /// Returns [`TileIndexError::InvalidBoundingBox`] if `bbox` is inverted
    /// or not finite.
    pub fn add(&mut self, tile_id: String, bbox: &BoundingBox) -> Result<(), TileIndexError> {
        if !bbox.is_valid() {
            return Err(TileIndexError::InvalidBoundingBox { id: tile_id });
        }
        self.tree.insert(IndexedTile {
            tile_id,
            envelope: to_envelope(bbox),
        });
        Ok(())
    }

    /// Ids of every entry whose box intersects `bbox`, boundaries
    /// included, sorted ascending without duplicates.
    #[must_use]
    pub fn intersection(&self, bbox: &BoundingBox) -> Vec<String> {
        if !bbox.is_valid() {
            return Vec::new();
        }
        let mut ids: Vec<String> = self
            .tree
            .locate_in_envelope_intersecting(&to_envelope(bbox))
            .map(|tile| tile.tile_id.clone())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tiles() -> TileIndex {
        let mut index = TileIndex::new();
        index
            .add("t1".to_string(), &BoundingBox::new(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        index
            .add("t2".to_string(), &BoundingBox::new(20.0, 20.0, 30.0, 30.0))
            .unwrap();
        index
    }

    #[test]
    fn point_queries_hit_only_covering_tiles() {
        let index = two_tiles();
        assert_eq!(index.intersection(&BoundingBox::point(5.0, 5.0)), ["t1"]);
        assert_eq!(index.intersection(&BoundingBox::point(25.0, 25.0)), ["t2"]);
        assert!(index.intersection(&BoundingBox::point(50.0, 50.0)).is_empty());
    }

    #[test]
    fn boundaries_count_as_intersecting() {
        let index = two_tiles();
        assert_eq!(index.intersection(&BoundingBox::point(10.0, 10.0)), ["t1"]);
        assert_eq!(
            index.intersection(&BoundingBox::new(5.0, 5.0, 25.0, 25.0)),
            ["t1", "t2"]
        );
    }

    #[test]
    fn bulk_load_matches_incremental_adds() {
        let index = TileIndex::from_entries(vec![
            TileCoverageEntry {
                tile_id: "b".to_string(),
                bbox: BoundingBox::new(0.0, 0.0, 2.0, 2.0),
            },
            TileCoverageEntry {
                tile_id: "a".to_string(),
                bbox: BoundingBox::new(1.0, 1.0, 3.0, 3.0),
            },
        ])
        .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.intersection(&BoundingBox::point(1.5, 1.5)), ["a", "b"]);
    }

    #[test]
    fn rejects_inverted_boxes() {
        let mut index = TileIndex::new();
        assert!(matches!(
            index.add("bad".to_string(), &BoundingBox::new(1.0, 0.0, 0.0, 1.0)),
            Err(TileIndexError::InvalidBoundingBox { .. })
        ));
        assert!(index.is_empty());
    }
}
