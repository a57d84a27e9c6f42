#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result log rows and batch run summaries.

use serde::{Deserialize, Serialize};
use tcm_change_models::{ScoredSeries, TimeLabel};
use tcm_geometry_models::GeometryId;

/// One row of the result log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Geometry this row belongs to.
    pub id: GeometryId,
    /// Labels of the usable time-steps, ascending.
    pub time_labels: Vec<TimeLabel>,
    /// One divergence per transition between consecutive labels.
    pub divergences: Vec<f64>,
}

impl ResultRecord {
    /// A row with no labels and no values, written for geometries that
    /// failed so they are not retried.
    #[must_use]
    pub const fn empty(id: GeometryId) -> Self {
        Self {
            id,
            time_labels: Vec::new(),
            divergences: Vec::new(),
        }
    }

    /// A row carrying a scored series.
    #[must_use]
    pub fn from_scored(id: GeometryId, scored: ScoredSeries) -> Self {
        Self {
            id,
            time_labels: scored.time_labels,
            divergences: scored.divergences,
        }
    }
}

/// Outcome counts of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Geometries in the input.
    pub total: usize,
    /// Geometries already in the result log at start-up.
    pub skipped_completed: usize,
    /// Rows written with at least one divergence.
    pub scored: usize,
    /// Rows written without divergences (not enough usable imagery).
    pub empty: usize,
    /// Geometries that failed and were recorded with an empty row.
    pub failed_recorded: usize,
    /// Geometries that failed on tile index connectivity; no row was
    /// written so the next run retries them.
    pub failed_retryable: usize,
    /// Geometries never started because the run was interrupted.
    pub not_started: usize,
    /// Whether a shutdown was requested during the run.
    pub interrupted: bool,
}

impl BatchSummary {
    /// Rows written during this run.
    #[must_use]
    pub const fn rows_written(&self) -> usize {
        self.scored + self.empty + self.failed_recorded
    }

    /// Geometries a later run will still have to process.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.failed_retryable + self.not_started
    }
}
