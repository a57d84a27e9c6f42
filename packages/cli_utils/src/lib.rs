#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal output for the `tcm` binary.
//!
//! [`init_logger`] routes `log` output through `indicatif-log-bridge` so
//! log lines do not tear the progress bar, and [`IndicatifProgress`]
//! renders batch progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tcm_batch::{BatchSummary, GeometryOutcome, ProgressCallback};

pub use indicatif::MultiProgress;

/// A progress bar driven by the batch driver.
pub struct IndicatifProgress {
    bar: ProgressBar,
    counting_style: ProgressStyle,
    failed: AtomicU64,
}

impl IndicatifProgress {
    /// Adds a bar to `multi` that spins while the batch starts up and
    /// becomes a counting bar with ETA once the work list size is known.
    #[must_use]
    pub fn geometries_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let counting_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.green/dim} {pos}/{len} {percent}% [{per_sec}, {eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Arc::new(Self {
            bar,
            counting_style,
            failed: AtomicU64::new(0),
        })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn started(&self, pending: u64, skipped_completed: u64) {
        self.bar.set_length(pending);
        self.bar.set_position(0);
        self.bar.set_style(self.counting_style.clone());
        if skipped_completed > 0 {
            log::info!("Resuming after {skipped_completed} completed geometries");
        }
        self.bar.set_message("Scoring geometries");
    }

    fn geometry_done(&self, outcome: GeometryOutcome) {
        if matches!(
            outcome,
            GeometryOutcome::FailedRecorded | GeometryOutcome::FailedRetryable
        ) {
            let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
            self.bar
                .set_message(format!("Scoring geometries ({failed} failed)"));
        }
        self.bar.inc(1);
    }

    fn finished(&self, summary: &BatchSummary) {
        if summary.skipped_completed == summary.total {
            self.bar.finish_and_clear();
        } else {
            self.bar
                .finish_with_message(format!("{} rows written", summary.rows_written()));
        }
    }
}

/// Installs `pretty_env_logger`, configured from `RUST_LOG`, behind
/// `indicatif-log-bridge`. Returns the [`MultiProgress`] every bar must
/// be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    // Fails only if a logger is already installed.
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}
