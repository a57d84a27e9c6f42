#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Change detection over an imagery time series.
//!
//! Scoring works on the *usable* time-steps of a sample: those with at
//! least one valid footprint pixel and one valid background pixel, and the
//! same band count as the first usable step. Each divergence compares a
//! usable step with the one before it:
//!
//! - [`ScoringMode::Kl`]: every valid pixel of every usable step (footprint
//!   and background) is pooled and clustered with seeded k-means, so labels
//!   mean the same thing across steps. The footprint's cluster histogram
//!   at step `i + 1` is compared with step `i` by smoothed KL divergence.
//! - [`ScoringMode::Color`]: the mean footprint pixel of step `i + 1` is
//!   compared with step `i` by mean absolute band difference.
//!
//! Fewer than two usable steps produce no divergences. That is not an
//! error.

pub mod divergence;
pub mod kmeans;

pub use kmeans::{ClusterModel, MAX_FIT_SAMPLES, default_cluster_count};
pub use tcm_change_models::{
    ChangeConfig, ScoredSeries, ScoringMode, TimeLabel, TimeSeriesSample, TimeStep,
};

use ndarray::{Array2, s};
use thiserror::Error;

/// Errors from scoring.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// The cluster count cannot partition the pooled pixels.
    #[error("Cannot fit {k} clusters to {pixels} pixels")]
    InvalidClusterCount {
        /// Requested cluster count.
        k: usize,
        /// Number of pooled pixels.
        pixels: usize,
    },

    /// Pooled pixels could not be arranged into a feature matrix.
    #[error("Pixel pool shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Scores `series` according to `config`.
///
/// # Errors
///
/// Returns [`ChangeError::InvalidClusterCount`] if `config.num_clusters` is
/// `Some(0)`. A requested count larger than the number of pooled pixels is
/// reduced to that number.
pub fn score(series: &TimeSeriesSample, config: &ChangeConfig) -> Result<ScoredSeries, ChangeError> {
    let usable = usable_steps(series);
    let time_labels: Vec<TimeLabel> = usable.iter().map(|step| step.label).collect();

    if usable.len() < 2 {
        return Ok(ScoredSeries {
            time_labels,
            divergences: Vec::new(),
        });
    }

    let divergences = match config.mode {
        ScoringMode::Kl => kl_scores(&usable, config)?,
        ScoringMode::Color => color_scores(&usable),
    };

    Ok(ScoredSeries {
        time_labels,
        divergences,
    })
}

fn usable_steps(series: &TimeSeriesSample) -> Vec<&TimeStep> {
    let mut bands = None;
    series
        .steps()
        .iter()
        .filter(|step| {
            if let Err(e) = step.check_shapes() {
                log::warn!("Dropping time-step {}: {e}", step.label);
                return false;
            }
            let (footprint, background) = step.valid_counts();
            if footprint == 0 || background == 0 || step.band_count() == 0 {
                log::debug!(
                    "Dropping time-step {}: {footprint} footprint / {background} background pixels",
                    step.label
                );
                return false;
            }
            match bands {
                None => {
                    bands = Some(step.band_count());
                    true
                }
                Some(expected) if expected == step.band_count() => true,
                Some(expected) => {
                    log::warn!(
                        "Dropping time-step {}: {} bands, expected {expected}",
                        step.label,
                        step.band_count()
                    );
                    false
                }
            }
        })
        .collect()
}

/// Valid pixels of every step stacked into one matrix, plus the owning
/// step and footprint flag of each row.
struct PixelPool {
    features: Array2<f32>,
    owners: Vec<(usize, bool)>,
}

fn pool_pixels(steps: &[&TimeStep]) -> Result<PixelPool, ChangeError> {
    let bands = steps.first().map_or(0, |step| step.band_count());
    let mut flat = Vec::new();
    let mut owners = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        for ((row, col), valid) in step.valid.indexed_iter() {
            if !*valid {
                continue;
            }
            flat.extend(step.pixels.slice(s![row, col, ..]).iter().copied());
            owners.push((index, step.footprint[[row, col]]));
        }
    }

    Ok(PixelPool {
        features: Array2::from_shape_vec((owners.len(), bands), flat)?,
        owners,
    })
}

fn kl_scores(steps: &[&TimeStep], config: &ChangeConfig) -> Result<Vec<f64>, ChangeError> {
    let pool = pool_pixels(steps)?;
    let pixels = pool.owners.len();
    let k = config
        .num_clusters
        .unwrap_or_else(|| default_cluster_count(pixels))
        .min(pixels);

    let model = ClusterModel::fit(pool.features.view(), k, config.seed)?;
    let labels = model.predict_all(pool.features.view());

    let histograms: Vec<Vec<f64>> = (0..steps.len())
        .filter_map(|index| {
            divergence::histogram(
                labels
                    .iter()
                    .zip(&pool.owners)
                    .filter(|(_, (owner, in_footprint))| *owner == index && *in_footprint)
                    .map(|(label, _)| *label),
                k,
            )
        })
        .collect();

    Ok(histograms
        .windows(2)
        .map(|pair| divergence::kl_divergence(&pair[1], &pair[0]))
        .collect())
}

#[allow(clippy::cast_precision_loss)]
fn mean_footprint_pixel(step: &TimeStep) -> Vec<f64> {
    let mut sums = vec![0.0_f64; step.band_count()];
    let mut count = 0_usize;
    for ((row, col), valid) in step.valid.indexed_iter() {
        if !*valid || !step.footprint[[row, col]] {
            continue;
        }
        count += 1;
        for (sum, value) in sums.iter_mut().zip(step.pixels.slice(s![row, col, ..])) {
            *sum += f64::from(*value);
        }
    }
    let count = count.max(1) as f64;
    sums.into_iter().map(|s| s / count).collect()
}

fn color_scores(steps: &[&TimeStep]) -> Vec<f64> {
    let means: Vec<Vec<f64>> = steps.iter().map(|step| mean_footprint_pixel(step)).collect();
    means
        .windows(2)
        .map(|pair| divergence::mean_absolute_difference(&pair[1], &pair[0]))
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array3};

    use super::*;

    /// A 4x4 RGB step: the centre 2x2 is footprint with colour `inner`,
    /// the ring is background with colour `outer`.
    fn step(year: i32, inner: [f32; 3], outer: [f32; 3]) -> TimeStep {
        let footprint = Array2::from_shape_fn((4, 4), |(r, c)| (1..3).contains(&r) && (1..3).contains(&c));
        let pixels = Array3::from_shape_fn((4, 4, 3), |(r, c, b)| {
            if footprint[[r, c]] { inner[b] } else { outer[b] }
        });
        TimeStep::new(TimeLabel::Year(year), pixels, Array2::from_elem((4, 4), true), footprint)
            .unwrap()
    }

    fn kl(k: usize) -> ChangeConfig {
        ChangeConfig {
            mode: ScoringMode::Kl,
            num_clusters: Some(k),
            seed: 0,
        }
    }

    const GRASS: [f32; 3] = [40.0, 120.0, 40.0];
    const ROOF: [f32; 3] = [200.0, 80.0, 60.0];
    const ROAD: [f32; 3] = [90.0, 90.0, 95.0];

    #[test]
    fn three_steps_give_two_divergences() {
        let series = TimeSeriesSample::new(vec![
            step(2014, GRASS, ROAD),
            step(2016, ROOF, ROAD),
            step(2018, ROOF, ROAD),
        ]);
        let scored = score(&series, &kl(4)).unwrap();
        assert_eq!(
            scored.time_labels,
            [TimeLabel::Year(2014), TimeLabel::Year(2016), TimeLabel::Year(2018)]
        );
        assert_eq!(scored.divergences.len(), 2);
        // Grass -> roof is a change; roof -> roof is not.
        assert!(scored.divergences[0] > 1.0, "{:?}", scored.divergences);
        assert!(scored.divergences[1].abs() < 1e-9, "{:?}", scored.divergences);
    }

    #[test]
    fn divergences_are_non_negative() {
        let series = TimeSeriesSample::new(vec![
            step(2010, ROOF, GRASS),
            step(2012, GRASS, ROAD),
            step(2014, ROAD, ROOF),
            step(2016, ROOF, ROOF),
        ]);
        let scored = score(&series, &kl(3)).unwrap();
        assert_eq!(scored.divergences.len(), 3);
        assert!(scored.divergences.iter().all(|d| *d >= 0.0));
    }

    #[test]
    fn scoring_is_deterministic() {
        let series = TimeSeriesSample::new(vec![
            step(2014, GRASS, ROAD),
            step(2016, ROOF, GRASS),
            step(2018, ROAD, ROOF),
        ]);
        let config = ChangeConfig {
            mode: ScoringMode::Kl,
            num_clusters: None,
            seed: 11,
        };
        assert_eq!(score(&series, &config).unwrap(), score(&series, &config).unwrap());
    }

    #[test]
    fn empty_and_single_step_series_have_no_signal() {
        let empty = score(&TimeSeriesSample::default(), &kl(4)).unwrap();
        assert!(empty.time_labels.is_empty());
        assert!(empty.is_empty());

        let single = score(&TimeSeriesSample::new(vec![step(2014, GRASS, ROAD)]), &kl(4)).unwrap();
        assert_eq!(single.time_labels, [TimeLabel::Year(2014)]);
        assert!(single.is_empty());
    }

    #[test]
    fn steps_without_background_are_dropped() {
        let mut no_background = step(2016, ROOF, ROAD);
        no_background.valid = no_background.footprint.clone();

        let series = TimeSeriesSample::new(vec![
            step(2014, GRASS, ROAD),
            no_background,
            step(2018, ROOF, ROAD),
        ]);
        let scored = score(&series, &kl(2)).unwrap();
        assert_eq!(scored.time_labels, [TimeLabel::Year(2014), TimeLabel::Year(2018)]);
        assert_eq!(scored.divergences.len(), 1);
    }

    #[test]
    fn steps_with_masks_off_the_pixel_grid_are_dropped() {
        let mut reshaped = step(2016, ROOF, ROAD);
        reshaped.footprint = Array2::from_elem((6, 6), true);
        reshaped.valid = Array2::from_elem((6, 6), true);
        assert!(reshaped.check_shapes().is_err());

        let series = TimeSeriesSample::new(vec![
            step(2014, GRASS, ROAD),
            reshaped,
            step(2018, ROOF, ROAD),
        ]);
        for mode in [ScoringMode::Kl, ScoringMode::Color] {
            let config = ChangeConfig {
                mode,
                num_clusters: Some(2),
                seed: 0,
            };
            let scored = score(&series, &config).unwrap();
            assert_eq!(scored.time_labels, [TimeLabel::Year(2014), TimeLabel::Year(2018)]);
        }
    }

    #[test]
    fn mismatched_band_counts_are_dropped() {
        let four_band = TimeStep::new(
            TimeLabel::Year(2016),
            Array3::from_elem((4, 4, 4), 1.0),
            Array2::from_elem((4, 4), true),
            Array2::from_shape_fn((4, 4), |(r, _)| r == 0),
        )
        .unwrap();
        let series = TimeSeriesSample::new(vec![
            step(2014, GRASS, ROAD),
            four_band,
            step(2018, ROOF, ROAD),
        ]);
        let scored = score(&series, &kl(2)).unwrap();
        assert_eq!(scored.time_labels.len(), 2);
    }

    #[test]
    fn colour_mode_compares_mean_footprint_pixels() {
        let series = TimeSeriesSample::new(vec![
            step(2014, [10.0, 20.0, 30.0], ROAD),
            step(2016, [13.0, 20.0, 24.0], GRASS),
        ]);
        let config = ChangeConfig {
            mode: ScoringMode::Color,
            num_clusters: None,
            seed: 0,
        };
        let scored = score(&series, &config).unwrap();
        assert_eq!(scored.divergences.len(), 1);
        assert!((scored.divergences[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_clusters_is_an_error() {
        let series = TimeSeriesSample::new(vec![step(2014, GRASS, ROAD), step(2016, ROOF, ROAD)]);
        assert!(matches!(
            score(&series, &kl(0)),
            Err(ChangeError::InvalidClusterCount { k: 0, .. })
        ));
    }

    #[test]
    fn cluster_count_is_capped_at_pixel_count() {
        let series = TimeSeriesSample::new(vec![step(2014, GRASS, ROAD), step(2016, ROOF, ROAD)]);
        let scored = score(&series, &kl(1000)).unwrap();
        assert_eq!(scored.divergences.len(), 1);
    }
}
