#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Time series and scoring types for footprint change detection.
//!
//! An imagery source produces a [`TimeSeriesSample`] per geometry; the
//! change detector turns it into a [`ScoredSeries`] according to a
//! [`ChangeConfig`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Label of one imagery time-step: an acquisition year or an exact date.
///
/// Labels order chronologically. A bare year sorts before any date in the
/// same year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TimeLabel {
    /// Acquisition year, e.g. a NAIP survey year.
    Year(i32),
    /// Exact acquisition date.
    Date(NaiveDate),
}

impl TimeLabel {
    fn sort_key(self) -> (i32, u32) {
        match self {
            Self::Year(year) => (year, 0),
            Self::Date(date) => (date.year(), date.ordinal()),
        }
    }
}

impl Ord for TimeLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for TimeLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year(year) => write!(f, "{year}"),
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

impl std::str::FromStr for TimeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(year) = s.parse::<i32>() {
            return Ok(Self::Year(year));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Self::Date)
            .map_err(|_| format!("unknown TimeLabel: {s}"))
    }
}

impl From<TimeLabel> for String {
    fn from(value: TimeLabel) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for TimeLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Pixels of one time-step, cropped to a geometry's neighborhood.
///
/// `pixels` is `height x width x bands`. `valid` marks pixels that are
/// inside the neighborhood and actually covered by imagery; `footprint`
/// marks pixels whose centre falls in the footprint. A valid pixel that is
/// not a footprint pixel is a background pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeStep {
    /// When this step was acquired.
    pub label: TimeLabel,
    /// Band values.
    pub pixels: Array3<f32>,
    /// Occupancy mask.
    pub valid: Array2<bool>,
    /// Footprint membership.
    pub footprint: Array2<bool>,
}

impl TimeStep {
    /// Builds a time-step, checking that the masks match the pixel grid.
    ///
    /// # Errors
    ///
    /// Returns a message describing the mismatch if either mask's shape
    /// differs from the first two dimensions of `pixels`.
    pub fn new(
        label: TimeLabel,
        pixels: Array3<f32>,
        valid: Array2<bool>,
        footprint: Array2<bool>,
    ) -> Result<Self, String> {
        let step = Self {
            label,
            pixels,
            valid,
            footprint,
        };
        step.check_shapes()?;
        Ok(step)
    }

    /// Checks that both masks match the pixel grid. The fields are public,
    /// so a step built without [`TimeStep::new`] may not.
    ///
    /// # Errors
    ///
    /// Returns a message describing the mismatch.
    pub fn check_shapes(&self) -> Result<(), String> {
        let (height, width, _) = self.pixels.dim();
        if self.valid.dim() != (height, width) || self.footprint.dim() != (height, width) {
            return Err(format!(
                "mask shapes {:?}/{:?} do not match pixel grid {height}x{width}",
                self.valid.dim(),
                self.footprint.dim()
            ));
        }
        Ok(())
    }

    /// Number of bands per pixel.
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.pixels.dim().2
    }

    /// Counts valid `(footprint, background)` pixels.
    #[must_use]
    pub fn valid_counts(&self) -> (usize, usize) {
        self.valid
            .iter()
            .zip(self.footprint.iter())
            .filter(|(valid, _)| **valid)
            .fold((0, 0), |(fp, bg), (_, in_footprint)| {
                if *in_footprint {
                    (fp + 1, bg)
                } else {
                    (fp, bg + 1)
                }
            })
    }
}

/// Ordered imagery time-steps for one geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesSample {
    steps: Vec<TimeStep>,
}

impl TimeSeriesSample {
    /// Builds a sample, sorting steps by label ascending.
    #[must_use]
    pub fn new(mut steps: Vec<TimeStep>) -> Self {
        steps.sort_by_key(|step| step.label);
        Self { steps }
    }

    /// The time-steps in ascending label order.
    #[must_use]
    pub fn steps(&self) -> &[TimeStep] {
        &self.steps
    }

    /// Number of time-steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there are no time-steps at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// How consecutive time-steps are compared.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScoringMode {
    /// KL divergence between cluster-membership histograms.
    #[default]
    Kl,
    /// Mean absolute difference between mean pixel values.
    Color,
}

/// Parameters for scoring one time series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeConfig {
    /// Scoring mode.
    pub mode: ScoringMode,
    /// Number of clusters; chosen from the pixel count when `None`.
    pub num_clusters: Option<usize>,
    /// Seed for sampling and cluster initialisation.
    pub seed: u64,
}

/// Output of scoring: the usable time labels and one divergence per
/// transition between consecutive usable steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredSeries {
    /// Labels of the time-steps that had usable data.
    pub time_labels: Vec<TimeLabel>,
    /// `time_labels.len() - 1` values, or none.
    pub divergences: Vec<f64>,
}

impl ScoredSeries {
    /// Whether scoring produced no signal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.divergences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array3};

    use super::*;

    fn step(label: TimeLabel) -> TimeStep {
        TimeStep::new(
            label,
            Array3::zeros((2, 2, 3)),
            Array2::from_elem((2, 2), true),
            Array2::from_shape_vec((2, 2), vec![true, false, false, false]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn labels_parse_and_display() {
        assert_eq!("2016".parse::<TimeLabel>().unwrap(), TimeLabel::Year(2016));
        let date: TimeLabel = "2018-06-03".parse().unwrap();
        assert_eq!(date.to_string(), "2018-06-03");
        assert!("June".parse::<TimeLabel>().is_err());
    }

    #[test]
    fn labels_sort_chronologically_across_variants() {
        let mut labels: Vec<TimeLabel> = ["2018-06-03", "2020", "2018", "2016-12-31"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        labels.sort();
        let rendered: Vec<String> = labels.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["2016-12-31", "2018", "2018-06-03", "2020"]);
    }

    #[test]
    fn sample_orders_steps_ascending() {
        let sample = TimeSeriesSample::new(vec![
            step(TimeLabel::Year(2020)),
            step(TimeLabel::Year(2014)),
            step(TimeLabel::Year(2016)),
        ]);
        let years: Vec<TimeLabel> = sample.steps().iter().map(|s| s.label).collect();
        assert_eq!(
            years,
            [TimeLabel::Year(2014), TimeLabel::Year(2016), TimeLabel::Year(2020)]
        );
    }

    #[test]
    fn rejects_mismatched_masks() {
        let result = TimeStep::new(
            TimeLabel::Year(2016),
            Array3::zeros((2, 2, 3)),
            Array2::from_elem((3, 2), true),
            Array2::from_elem((2, 2), false),
        );
        assert!(result.is_err());
    }

    #[test]
    fn counts_footprint_and_background_pixels() {
        let mut s = step(TimeLabel::Year(2016));
        s.valid[[1, 1]] = false;
        assert_eq!(s.valid_counts(), (1, 2));
    }

    #[test]
    fn scoring_mode_names() {
        assert_eq!("color".parse::<ScoringMode>().unwrap(), ScoringMode::Color);
        assert_eq!(ScoringMode::Kl.to_string(), "kl");
    }
}
