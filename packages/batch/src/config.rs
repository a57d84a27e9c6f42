//! Batch configuration.
//!
//! A [`BatchConfig`] is read from TOML and overlaid with command-line
//! values through [`BatchConfig::merge`]. Every field is optional at this
//! stage; [`BatchConfig::validate`] fills defaults, rejects bad
//! combinations and produces the [`BatchSettings`] the driver runs with.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tcm_change::{ChangeConfig, ScoringMode};
use tcm_geometry::{DEFAULT_TARGET_CRS, ParcelMode, RegionBuilder};
use tcm_imagery::ImageryConfig;
use tcm_tile_index::ClientConfig;
use thiserror::Error;

use crate::result_log::RESULTS_FILE_NAME;

/// Environment variable holding the tile index secret.
pub const SECRET_ENV_VAR: &str = "TCM_TILE_INDEX_SECRET";

/// Default number of geometries between throughput log lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 10_000;

/// Errors in the batch configuration. All are raised before any work.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`BatchConfig`].
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required option was not given.
    #[error("Missing required option '{0}'")]
    MissingOption(&'static str),

    /// The buffer is NaN or infinite.
    #[error("Buffer must be a finite number of degrees, got {0}")]
    InvalidBuffer(f64),

    /// Fewer than two clusters were requested.
    #[error("num_clusters must be at least 2, got {0}")]
    TooFewClusters(usize),

    /// `num_clusters` only applies to KL scoring.
    #[error("num_clusters cannot be combined with algorithm = color")]
    ClustersWithColor,

    /// A zero-sized worker pool was requested.
    #[error("workers must be at least 1")]
    ZeroWorkers,

    /// The tile catalog backend needs a `[tile_index]` section.
    #[error("imagery kind 'tile_catalog' requires a [tile_index] section")]
    MissingTileIndex,

    /// The target CRS could not be parsed.
    #[error("Invalid target_crs: {0}")]
    InvalidCrs(String),
}

/// Unvalidated batch options, as read from TOML or the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// GeoJSON geometry source.
    pub dataset: Option<PathBuf>,
    /// Directory receiving `results.csv`.
    pub output_dir: Option<PathBuf>,
    /// Neighborhood buffer in degrees.
    pub buffer: Option<f64>,
    /// Cluster count for KL scoring.
    pub num_clusters: Option<usize>,
    /// Scoring mode, `kl` by default.
    pub algorithm: Option<ScoringMode>,
    /// How parcels are used, `no_parcel` by default.
    pub parcel_mode: Option<ParcelMode>,
    /// Truncate an existing result log instead of resuming.
    pub overwrite: Option<bool>,
    /// Worker threads, available parallelism by default.
    pub workers: Option<usize>,
    /// Geometries between throughput log lines; 0 disables them.
    pub progress_every: Option<u64>,
    /// Seed for clustering.
    pub seed: Option<u64>,
    /// PROJ.4 definition of the working CRS.
    pub target_crs: Option<String>,
    /// Imagery backend.
    pub imagery: Option<ImageryConfig>,
    /// Tile index connection.
    pub tile_index: Option<ClientConfig>,
}

impl BatchConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] if the document is invalid.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Toml`] if it is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Overlays `overrides` on `self`; every option set in `overrides`
    /// wins.
    #[must_use]
    pub fn merge(self, overrides: Self) -> Self {
        Self {
            dataset: overrides.dataset.or(self.dataset),
            output_dir: overrides.output_dir.or(self.output_dir),
            buffer: overrides.buffer.or(self.buffer),
            num_clusters: overrides.num_clusters.or(self.num_clusters),
            algorithm: overrides.algorithm.or(self.algorithm),
            parcel_mode: overrides.parcel_mode.or(self.parcel_mode),
            overwrite: overrides.overwrite.or(self.overwrite),
            workers: overrides.workers.or(self.workers),
            progress_every: overrides.progress_every.or(self.progress_every),
            seed: overrides.seed.or(self.seed),
            target_crs: overrides.target_crs.or(self.target_crs),
            imagery: overrides.imagery.or(self.imagery),
            tile_index: overrides.tile_index.or(self.tile_index),
        }
    }

    /// Sets the tile index secret, if a `[tile_index]` section exists.
    pub fn set_secret(&mut self, secret: String) {
        if let Some(tile_index) = &mut self.tile_index {
            tile_index.secret = secret;
        }
    }

    /// Checks the options and fills defaults.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<BatchSettings, ConfigError> {
        let dataset = self
            .dataset
            .clone()
            .ok_or(ConfigError::MissingOption("dataset"))?;
        let output_dir = self
            .output_dir
            .clone()
            .ok_or(ConfigError::MissingOption("output_dir"))?;

        let buffer = self.buffer.ok_or(ConfigError::MissingOption("buffer"))?;
        if !buffer.is_finite() {
            return Err(ConfigError::InvalidBuffer(buffer));
        }
        if buffer > 1.0 {
            log::warn!("Buffer {buffer} is in degrees; values above 1 cover very large neighborhoods");
        }

        let mode = self.algorithm.unwrap_or_default();
        if let Some(k) = self.num_clusters {
            if mode == ScoringMode::Color {
                return Err(ConfigError::ClustersWithColor);
            }
            if k < 2 {
                return Err(ConfigError::TooFewClusters(k));
            }
        }

        let workers = match self.workers {
            Some(0) => return Err(ConfigError::ZeroWorkers),
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        };

        let imagery = self
            .imagery
            .clone()
            .ok_or(ConfigError::MissingOption("imagery"))?;
        if imagery.requires_tile_index() && self.tile_index.is_none() {
            return Err(ConfigError::MissingTileIndex);
        }

        let target_crs = self
            .target_crs
            .clone()
            .unwrap_or_else(|| DEFAULT_TARGET_CRS.to_string());
        RegionBuilder::new(&target_crs).map_err(|e| ConfigError::InvalidCrs(e.to_string()))?;

        Ok(BatchSettings {
            dataset,
            output_dir,
            buffer,
            change: ChangeConfig {
                mode,
                num_clusters: self.num_clusters,
                seed: self.seed.unwrap_or(0),
            },
            parcel_mode: self.parcel_mode.unwrap_or_default(),
            overwrite: self.overwrite.unwrap_or(false),
            workers,
            progress_every: self.progress_every.unwrap_or(DEFAULT_PROGRESS_EVERY),
            target_crs,
            imagery,
            tile_index: self.tile_index.clone(),
        })
    }
}

/// Validated settings shared by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    /// GeoJSON geometry source.
    pub dataset: PathBuf,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Neighborhood buffer in degrees.
    pub buffer: f64,
    /// Scoring parameters.
    pub change: ChangeConfig,
    /// Parcel handling.
    pub parcel_mode: ParcelMode,
    /// Truncate the log first.
    pub overwrite: bool,
    /// Worker thread count, at least 1.
    pub workers: usize,
    /// Geometries between throughput log lines; 0 disables them.
    pub progress_every: u64,
    /// PROJ.4 definition of the working CRS.
    pub target_crs: String,
    /// Imagery backend.
    pub imagery: ImageryConfig,
    /// Tile index connection.
    pub tile_index: Option<ClientConfig>,
}

impl BatchSettings {
    /// Path of the result log.
    #[must_use]
    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(RESULTS_FILE_NAME)
    }
}
