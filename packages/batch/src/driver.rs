//! The worker pool.
//!
//! Start-up (dataset check, log repair, checkpoint, geometry loading)
//! happens on the calling thread. Work is then pulled from a shared atomic
//! cursor by `workers` OS threads, each owning a [`WorkerContext`]. Rows
//! go to a single [`ResultWriter`] thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tcm_batch_models::{BatchSummary, ResultRecord};
use tcm_geometry::{GeometryRecord, RegionBuilder};
use tcm_imagery::{Imagery, ImagerySource};

use crate::config::BatchSettings;
use crate::progress::{GeometryOutcome, ProgressCallback};
use crate::result_log::{self, ResultWriter};
use crate::{BatchError, ProcessError};

/// Per-worker state, built once when the worker starts.
pub struct WorkerContext {
    worker_id: usize,
    settings: Arc<BatchSettings>,
    regions: RegionBuilder,
    imagery: Box<dyn ImagerySource>,
}

impl WorkerContext {
    /// Creates a context around an existing imagery source.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Geometry`] if the target CRS is invalid.
    pub fn new(
        worker_id: usize,
        settings: Arc<BatchSettings>,
        imagery: Box<dyn ImagerySource>,
    ) -> Result<Self, BatchError> {
        let regions = RegionBuilder::new(&settings.target_crs)?;
        Ok(Self {
            worker_id,
            settings,
            regions,
            imagery,
        })
    }

    /// Creates a context with the imagery backend named in `settings`,
    /// including its own tile index client.
    ///
    /// # Errors
    ///
    /// Returns an error if the imagery backend or region builder cannot be
    /// created.
    pub fn from_settings(worker_id: usize, settings: Arc<BatchSettings>) -> Result<Self, BatchError> {
        let imagery = Imagery::from_config(&settings.imagery, settings.tile_index.as_ref())?;
        Self::new(worker_id, settings, Box::new(imagery))
    }

    /// Index of the worker owning this context.
    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Runs the full pipeline for one geometry.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] if region derivation, imagery or scoring
    /// fails.
    pub fn process(&mut self, record: &GeometryRecord) -> Result<ResultRecord, ProcessError> {
        let shapes = self
            .regions
            .derive(&record.footprint, record.parcel.as_ref(), self.settings.buffer)?;
        let series = self.imagery.get_series(record, &shapes)?;
        let scored = tcm_change::score(&series, &self.settings.change)?;
        log::debug!(
            "Worker {}: geometry {} has {} usable steps",
            self.worker_id,
            record.id,
            scored.time_labels.len()
        );
        Ok(ResultRecord::from_scored(record.id.clone(), scored))
    }
}

#[derive(Default)]
struct Tally {
    scored: AtomicUsize,
    empty: AtomicUsize,
    failed_recorded: AtomicUsize,
    failed_retryable: AtomicUsize,
    finished: AtomicUsize,
}

impl Tally {
    fn count(&self, outcome: GeometryOutcome) {
        let counter = match outcome {
            GeometryOutcome::Scored => &self.scored,
            GeometryOutcome::Empty => &self.empty,
            GeometryOutcome::FailedRecorded => &self.failed_recorded,
            GeometryOutcome::FailedRetryable => &self.failed_retryable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Dispatch<'a> {
    pending: &'a [GeometryRecord],
    cursor: AtomicUsize,
    tally: Tally,
    progress: &'a Arc<dyn ProgressCallback>,
    shutdown: &'a AtomicBool,
    started_at: Instant,
    progress_every: u64,
}

impl Dispatch<'_> {
    fn work(&self, context: &mut WorkerContext, sender: &Sender<ResultRecord>) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                log::debug!("Worker {} stopping on shutdown", context.worker_id());
                break;
            }
            let index = self.cursor.fetch_add(1, Ordering::Relaxed);
            let Some(record) = self.pending.get(index) else {
                break;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| context.process(record)))
                .unwrap_or_else(|payload| Err(ProcessError::Panic(panic_message(payload.as_ref()))));

            let (row, done) = match outcome {
                Ok(row) => {
                    let done = if row.divergences.is_empty() {
                        GeometryOutcome::Empty
                    } else {
                        GeometryOutcome::Scored
                    };
                    (Some(row), done)
                }
                Err(e) if e.is_retryable() => {
                    log::error!("Geometry {}: {e} (will retry on the next run)", record.id);
                    (None, GeometryOutcome::FailedRetryable)
                }
                Err(e) => {
                    log::warn!("Geometry {}: {e} (recording an empty result)", record.id);
                    (
                        Some(ResultRecord::empty(record.id.clone())),
                        GeometryOutcome::FailedRecorded,
                    )
                }
            };
            self.tally.count(done);

            if let Some(row) = row {
                if sender.send(row).is_err() {
                    log::error!("Worker {}: result writer stopped", context.worker_id());
                    break;
                }
            }

            self.progress.geometry_done(done);
            let finished = self.tally.finished.fetch_add(1, Ordering::Relaxed) + 1;
            self.report(finished);
        }
    }

    fn report(&self, finished: usize) {
        if self.progress_every == 0 || finished as u64 % self.progress_every != 0 {
            return;
        }
        let elapsed = self.started_at.elapsed().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let rate = if elapsed > 0.0 {
            finished as f64 / elapsed
        } else {
            0.0
        };
        log::info!(
            "Processed {finished}/{} geometries in {elapsed:.1}s ({rate:.1}/s)",
            self.pending.len()
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs a batch with workers built by `factory`.
///
/// Ids already in the result log are skipped. Each remaining geometry gets
/// exactly one row unless it fails on tile index connectivity, or the run
/// is interrupted through `shutdown` before it starts.
///
/// # Errors
///
/// Returns an error, before any work is dispatched, if the dataset is
/// missing, the output cannot be prepared or the geometries cannot be
/// loaded. Also fails if no worker could start, or if writing the log
/// fails.
pub fn run_batch<F>(
    settings: &BatchSettings,
    factory: F,
    progress: &Arc<dyn ProgressCallback>,
    shutdown: &AtomicBool,
) -> Result<BatchSummary, BatchError>
where
    F: Fn(usize) -> Result<WorkerContext, BatchError> + Sync,
{
    if !settings.dataset.is_file() {
        return Err(BatchError::InputMissing(settings.dataset.clone()));
    }
    std::fs::create_dir_all(&settings.output_dir)?;

    let results_path = settings.results_path();
    result_log::prepare_log(&results_path, settings.overwrite)?;
    let completed = result_log::read_log(&results_path)?.completed_ids();
    log::info!(
        "Checkpoint: {} geometries already in {}",
        completed.len(),
        results_path.display()
    );

    let records = tcm_geometry::load_geometries(&settings.dataset, settings.parcel_mode)?;
    let total = records.len();
    let pending: Vec<GeometryRecord> = records
        .into_iter()
        .filter(|record| !completed.contains(&record.id))
        .collect();

    let mut summary = BatchSummary {
        total,
        skipped_completed: total - pending.len(),
        ..BatchSummary::default()
    };

    log::info!(
        "Starting batch: {} of {total} geometries from {}, buffer {}, k {}, mode {}, {} workers",
        pending.len(),
        settings.dataset.display(),
        settings.buffer,
        settings
            .change
            .num_clusters
            .map_or_else(|| "auto".to_string(), |k| k.to_string()),
        settings.change.mode,
        settings.workers,
    );

    if pending.is_empty() {
        log::info!("Nothing to do");
        progress.finished(&summary);
        return Ok(summary);
    }

    progress.started(pending.len() as u64, summary.skipped_completed as u64);

    let writer = ResultWriter::spawn(&results_path)?;
    let dispatch = Dispatch {
        pending: &pending,
        cursor: AtomicUsize::new(0),
        tally: Tally::default(),
        progress,
        shutdown,
        started_at: Instant::now(),
        progress_every: settings.progress_every,
    };

    let worker_count = settings.workers.min(pending.len());
    let outcomes: Vec<Result<(), BatchError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..worker_count)
            .map(|worker_id| {
                let sender = writer.sender();
                let dispatch = &dispatch;
                let factory = &factory;
                scope.spawn(move || -> Result<(), BatchError> {
                    let mut context = factory(worker_id)?;
                    dispatch.work(&mut context, &sender);
                    Ok(())
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(worker_id, handle)| {
                handle
                    .join()
                    .unwrap_or(Err(BatchError::WorkerPanicked(worker_id)))
            })
            .collect()
    });

    let written = writer.finish()?;
    log::debug!("Wrote {written} rows to {}", results_path.display());

    let mut failures = Vec::new();
    for (worker_id, outcome) in outcomes.into_iter().enumerate() {
        if let Err(e) = outcome {
            log::error!("Worker {worker_id} failed to start: {e}");
            failures.push(e);
        }
    }
    if failures.len() == worker_count {
        if let Some(first) = failures.into_iter().next() {
            return Err(first);
        }
    }

    let started = dispatch.cursor.load(Ordering::Relaxed).min(pending.len());
    summary.scored = dispatch.tally.scored.load(Ordering::Relaxed);
    summary.empty = dispatch.tally.empty.load(Ordering::Relaxed);
    summary.failed_recorded = dispatch.tally.failed_recorded.load(Ordering::Relaxed);
    summary.failed_retryable = dispatch.tally.failed_retryable.load(Ordering::Relaxed);
    summary.not_started = pending.len() - started;
    summary.interrupted = shutdown.load(Ordering::Relaxed);

    log::info!(
        "Batch finished in {:.1}s: {} scored, {} empty, {} failed, {} skipped as completed",
        dispatch.started_at.elapsed().as_secs_f64(),
        summary.scored,
        summary.empty,
        summary.failed_recorded,
        summary.skipped_completed,
    );
    if summary.failed_retryable > 0 {
        log::error!(
            "{} geometries failed because the tile index was unreachable; rerun to retry them",
            summary.failed_retryable
        );
    }
    if summary.interrupted {
        log::warn!(
            "Interrupted with {} geometries not started; rerun to resume",
            summary.not_started
        );
    }
    progress.finished(&summary);

    Ok(summary)
}
