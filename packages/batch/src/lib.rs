#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Resumable parallel batch driver.
//!
//! Scores every geometry of a dataset once across process lifetimes. The
//! append-only result log in the output directory doubles as the
//! checkpoint: a restarted run skips every id already logged.
//!
//! Per-geometry failures never stop the batch. Data failures are recorded
//! with an empty row; tile index connectivity failures write nothing so
//! the next run picks them up again.

pub mod config;
pub mod driver;
pub mod progress;
pub mod result_log;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub use config::{BatchConfig, BatchSettings, ConfigError};
pub use driver::{WorkerContext, run_batch};
pub use progress::{GeometryOutcome, NullProgress, ProgressCallback, null_progress};
pub use tcm_batch_models::{BatchSummary, ResultRecord};

use tcm_change::ChangeError;
use tcm_geometry::GeometryError;
use tcm_imagery::ImageryError;
use thiserror::Error;

/// Errors that stop a batch before or while dispatching.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The geometry source does not exist.
    #[error("Geometry source {} does not exist", .0.display())]
    InputMissing(PathBuf),

    /// The output directory or result log could not be prepared.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Geometries could not be loaded, or a worker could not set up its
    /// region builder.
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// A worker could not set up its imagery source.
    #[error("Imagery setup failed: {0}")]
    Imagery(#[from] ImageryError),

    /// A worker panicked outside per-geometry processing.
    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),
}

/// Why one geometry could not be scored.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Region shapes could not be derived.
    #[error("Region derivation failed: {0}")]
    Geometry(#[from] GeometryError),

    /// Imagery could not be read.
    #[error("Imagery failed: {0}")]
    Imagery(#[from] ImageryError),

    /// Scoring failed.
    #[error("Scoring failed: {0}")]
    Change(#[from] ChangeError),

    /// Processing panicked.
    #[error("Panicked: {0}")]
    Panic(String),
}

impl ProcessError {
    /// Whether the failure is a tile index connectivity problem, in which
    /// case no row is written and the geometry is retried on resume.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Imagery(e) if e.is_connectivity())
    }
}

/// Validates `config` and runs the batch it describes, with one imagery
/// backend and tile index client per worker.
///
/// # Errors
///
/// Returns [`BatchError::Config`] if validation fails, or any error from
/// [`run_batch`].
pub fn run_from_config(
    config: &BatchConfig,
    progress: &Arc<dyn ProgressCallback>,
    shutdown: &AtomicBool,
) -> Result<BatchSummary, BatchError> {
    let settings = Arc::new(config.validate()?);
    run_batch(
        &settings,
        |worker_id| WorkerContext::from_settings(worker_id, Arc::clone(&settings)),
        progress,
        shutdown,
    )
}
