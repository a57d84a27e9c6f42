//! Static tile catalog loading.
//!
//! A catalog is a CSV file of `tile_id,min_x,min_y,max_x,max_y` rows. A
//! header row is optional and detected by its coordinates not parsing.

use std::path::Path;

use tcm_tile_index_models::{BoundingBox, TileCoverageEntry};

use crate::TileIndexError;

/// Reads every entry from the catalog at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a data row does not
/// have five fields with numeric coordinates.
pub fn load_catalog(path: &Path) -> Result<Vec<TileCoverageEntry>, TileIndexError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut entries = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let line = record.position().map_or(index as u64 + 1, csv::Position::line);

        if record.len() != 5 {
            return Err(TileIndexError::Catalog {
                line,
                message: format!("expected 5 fields, found {}", record.len()),
            });
        }

        let coords: Result<Vec<f64>, _> = (1..5).map(|i| record[i].parse::<f64>()).collect();
        let coords = match coords {
            Ok(coords) => coords,
            Err(_) if index == 0 => {
                log::debug!("Skipping catalog header row in {}", path.display());
                continue;
            }
            Err(e) => {
                return Err(TileIndexError::Catalog {
                    line,
                    message: e.to_string(),
                });
            }
        };

        entries.push(TileCoverageEntry {
            tile_id: record[0].to_string(),
            bbox: BoundingBox::new(coords[0], coords[1], coords[2], coords[3]),
        });
    }

    log::info!("Read {} tile entries from {}", entries.len(), path.display());
    Ok(entries)
}
