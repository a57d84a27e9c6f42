#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `tcm`: footprint change detection over multi-year imagery.
//!
//! `tcm run` scores a geometry dataset with a resumable worker pool.
//! `tcm serve-index` serves the shared tile index that the workers query;
//! `query-index`, `add-tile` and `index-health` talk to a running index.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};
use tcm_batch::config::SECRET_ENV_VAR;
use tcm_batch::{BatchConfig, BatchSummary};
use tcm_change::ScoringMode;
use tcm_cli_utils::{IndicatifProgress, MultiProgress};
use tcm_geometry::ParcelMode;
use tcm_tile_index::{
    BoundingBox, ClientConfig, DEFAULT_PORT, ServerConfig, TileIndex, TileIndexClient,
    TileIndexError, load_catalog, run_server,
};

#[derive(Parser)]
#[command(name = "tcm", about = "Temporal cluster matching for building footprints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every geometry of a dataset, resuming from an existing result log
    Run(RunArgs),
    /// Load a tile catalog CSV and serve it as the shared tile index
    ServeIndex {
        /// CSV of `tile_id,min_x,min_y,max_x,max_y` rows (header optional)
        #[arg(long)]
        catalog: PathBuf,
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Shared secret clients must present; empty disables authentication
        #[arg(long, env = SECRET_ENV_VAR, hide_env_values = true, default_value = "")]
        secret: String,
    },
    /// List the tiles covering a point or box
    QueryIndex {
        /// Query point as `LON,LAT`
        #[arg(long, value_parser = parse_point, conflicts_with = "bbox", required_unless_present = "bbox")]
        point: Option<BoundingBox>,
        /// Query box as `MIN_X,MIN_Y,MAX_X,MAX_Y`
        #[arg(long, value_parser = parse_bbox)]
        bbox: Option<BoundingBox>,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Register one tile with a running index
    AddTile {
        /// Tile id, a path relative to the imagery root
        #[arg(long)]
        id: String,
        /// Coverage as `MIN_X,MIN_Y,MAX_X,MAX_Y`
        #[arg(long, value_parser = parse_bbox)]
        bbox: BoundingBox,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Check that a tile index is reachable and report its size
    IndexHealth {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[derive(Args)]
struct ConnectionArgs {
    /// Tile index base URL
    #[arg(long, default_value = "http://127.0.0.1:50000")]
    url: String,
    /// Shared secret
    #[arg(long, env = SECRET_ENV_VAR, hide_env_values = true, default_value = "")]
    secret: String,
}

impl ConnectionArgs {
    fn client_config(self) -> ClientConfig {
        ClientConfig {
            url: self.url,
            secret: self.secret,
            ..ClientConfig::default()
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// TOML file with batch options; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// GeoJSON geometry source
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// Output directory for `results.csv`
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Neighborhood buffer in degrees
    #[arg(long, allow_negative_numbers = true)]
    buffer: Option<f64>,
    /// Number of clusters (KL scoring only)
    #[arg(long)]
    num_clusters: Option<usize>,
    /// Scoring mode: `kl` or `color`
    #[arg(long)]
    algorithm: Option<ScoringMode>,
    /// Parcel handling: `no_parcel`, `parcel` or `parcel_dedup`
    #[arg(long)]
    parcel_mode: Option<ParcelMode>,
    /// Truncate an existing result log instead of resuming
    #[arg(long)]
    overwrite: bool,
    /// Worker threads (default: available parallelism)
    #[arg(long)]
    workers: Option<usize>,
    /// Geometries between throughput log lines
    #[arg(long)]
    progress_every: Option<u64>,
    /// Clustering seed
    #[arg(long)]
    seed: Option<u64>,
    /// PROJ.4 definition of the working CRS
    #[arg(long)]
    target_crs: Option<String>,
    /// Tile index base URL
    #[arg(long)]
    tile_index_url: Option<String>,
}

impl RunArgs {
    /// Reads the config file, if any, and applies the flags and the
    /// secret from the environment on top.
    fn into_config(self) -> Result<BatchConfig, tcm_batch::ConfigError> {
        let file = match &self.config {
            Some(path) => BatchConfig::from_toml_file(path)?,
            None => BatchConfig::default(),
        };

        let mut config = file.merge(BatchConfig {
            dataset: self.dataset,
            output_dir: self.output_dir,
            buffer: self.buffer,
            num_clusters: self.num_clusters,
            algorithm: self.algorithm,
            parcel_mode: self.parcel_mode,
            overwrite: self.overwrite.then_some(true),
            workers: self.workers,
            progress_every: self.progress_every,
            seed: self.seed,
            target_crs: self.target_crs,
            imagery: None,
            tile_index: None,
        });

        if let Some(url) = self.tile_index_url {
            config.tile_index.get_or_insert_with(ClientConfig::default).url = url;
        }
        if let Ok(secret) = std::env::var(SECRET_ENV_VAR) {
            config.set_secret(secret);
        }
        Ok(config)
    }
}

fn parse_numbers<const N: usize>(value: &str) -> Result<[f64; N], String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {N} comma-separated numbers, got '{value}'"));
    }
    let mut numbers = [0.0; N];
    for (slot, part) in numbers.iter_mut().zip(parts) {
        *slot = part
            .parse()
            .map_err(|e| format!("invalid number '{part}': {e}"))?;
    }
    Ok(numbers)
}

fn parse_point(value: &str) -> Result<BoundingBox, String> {
    let [x, y] = parse_numbers::<2>(value)?;
    Ok(BoundingBox::point(x, y))
}

fn parse_bbox(value: &str) -> Result<BoundingBox, String> {
    let [min_x, min_y, max_x, max_y] = parse_numbers::<4>(value)?;
    let bbox = BoundingBox::new(min_x, min_y, max_x, max_y);
    if !bbox.is_valid() {
        return Err(format!("'{value}' is not a valid box (min must not exceed max)"));
    }
    Ok(bbox)
}

/// Runs a blocking tile index call off the async runtime.
async fn with_client<T, F>(config: ClientConfig, call: F) -> Result<T, Box<dyn std::error::Error>>
where
    T: Send + 'static,
    F: FnOnce(&TileIndexClient) -> Result<T, TileIndexError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let client = TileIndexClient::new(&config)?;
        call(&client)
    })
    .await?;
    Ok(result?)
}

async fn run(args: RunArgs, multi: &MultiProgress) -> Result<BatchSummary, Box<dyn std::error::Error>> {
    let config = args.into_config()?;
    let progress = IndicatifProgress::geometries_bar(multi, "Preparing batch");

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, finishing in-flight geometries");
            signal.store(true, Ordering::Relaxed);
        }
    });

    let summary = tokio::task::spawn_blocking(move || {
        tcm_batch::run_from_config(&config, &progress, &shutdown)
    })
    .await??;
    Ok(summary)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = tcm_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let summary = run(args, &multi).await?;
            println!(
                "{} total, {} already done, {} scored, {} empty, {} failed, {} to retry, {} not started",
                summary.total,
                summary.skipped_completed,
                summary.scored,
                summary.empty,
                summary.failed_recorded,
                summary.failed_retryable,
                summary.not_started,
            );
        }
        Commands::ServeIndex {
            catalog,
            bind,
            port,
            secret,
        } => {
            let index = TileIndex::from_entries(load_catalog(&catalog)?)?;
            log::info!("Loaded {} tiles from {}", index.len(), catalog.display());
            let config = ServerConfig {
                bind_addr: bind,
                port,
                secret,
            };
            tokio::task::spawn_blocking(move || {
                actix_web::rt::System::new().block_on(run_server(index, config))
            })
            .await??;
        }
        Commands::QueryIndex {
            point,
            bbox,
            connection,
        } => {
            let Some(query) = point.or(bbox) else {
                return Err("one of --point or --bbox is required".into());
            };
            let ids = with_client(connection.client_config(), move |client| {
                client.intersection(query)
            })
            .await?;
            for id in &ids {
                println!("{id}");
            }
            log::info!("{} tiles cover the query", ids.len());
        }
        Commands::AddTile {
            id,
            bbox,
            connection,
        } => {
            with_client(connection.client_config(), move |client| client.add(&id, bbox)).await?;
            log::info!("Added tile");
        }
        Commands::IndexHealth { connection } => {
            let health = with_client(connection.client_config(), TileIndexClient::health).await?;
            println!(
                "healthy: {}, version: {}, entries: {}",
                health.healthy, health.version, health.entries
            );
        }
    }

    Ok(())
}
