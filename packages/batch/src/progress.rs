//! Progress hooks for batch runs.
//!
//! [`run_batch`](crate::run_batch) announces the work list, then reports
//! every geometry's [`GeometryOutcome`] from whichever worker handled it,
//! then hands over the final [`BatchSummary`]. Rendering is left to the
//! implementor.

use std::sync::Arc;

use tcm_batch_models::BatchSummary;

/// What happened to one dispatched geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryOutcome {
    /// A row with at least one divergence was written.
    Scored,
    /// A row without divergences was written.
    Empty,
    /// Processing failed and an empty row was written in its place.
    FailedRecorded,
    /// The tile index was unreachable; no row was written.
    FailedRetryable,
}

impl GeometryOutcome {
    /// Whether a row for the geometry went to the result log.
    #[must_use]
    pub const fn wrote_row(self) -> bool {
        !matches!(self, Self::FailedRetryable)
    }
}

/// Receives batch progress. [`geometry_done`](Self::geometry_done) is
/// called concurrently from every worker thread.
pub trait ProgressCallback: Send + Sync {
    /// The work list is known. `pending` geometries will be dispatched;
    /// `skipped_completed` were already in the result log.
    fn started(&self, pending: u64, skipped_completed: u64);

    /// One geometry has been handled.
    fn geometry_done(&self, outcome: GeometryOutcome);

    /// The run is over, including runs that had nothing to dispatch.
    fn finished(&self, summary: &BatchSummary);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn started(&self, _pending: u64, _skipped_completed: u64) {}
    fn geometry_done(&self, _outcome: GeometryOutcome) {}
    fn finished(&self, _summary: &BatchSummary) {}
}

/// A shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
