#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared spatial index of imagery tile coverage.
//!
//! One server process loads the tile catalog into an R-tree and answers
//! `add` and `intersection` calls over HTTP, so every batch worker shares
//! a single resident index instead of loading its own copy. Workers talk
//! to it through the blocking [`TileIndexClient`].

pub mod catalog;
pub mod client;
mod handlers;
pub mod index;
pub mod server;

pub use catalog::load_catalog;
pub use client::{ClientConfig, TileIndexClient};
pub use index::TileIndex;
pub use server::{DEFAULT_PORT, ServerConfig, SharedIndex, bind_server, configure, run_server};
pub use tcm_tile_index_models::{BoundingBox, TileCoverageEntry};

use thiserror::Error;

/// Errors from building, serving, or querying the tile index.
#[derive(Debug, Error)]
pub enum TileIndexError {
    /// A coverage box is inverted or not finite.
    #[error("Invalid bounding box for tile '{id}'")]
    InvalidBoundingBox {
        /// Tile the box belongs to.
        id: String,
    },

    /// A catalog row could not be parsed.
    #[error("Catalog line {line}: {message}")]
    Catalog {
        /// 1-based line number.
        line: u64,
        /// What was wrong with it.
        message: String,
    },

    /// Reading the catalog failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog is not valid CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The HTTP request failed (connect, timeout, or body decoding).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the shared secret.
    #[error("Tile index server rejected the shared secret")]
    Unauthorized,

    /// The server answered with a non-success status.
    #[error("Tile index server returned {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },
}

impl TileIndexError {
    /// Whether this error means the service itself is unavailable rather
    /// than the request being wrong: refused or dropped connections,
    /// timeouts, authentication failures, and server errors.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Unauthorized => true,
            Self::Server { status, .. } => *status >= 500,
            Self::InvalidBoundingBox { .. } | Self::Catalog { .. } | Self::Io(_) | Self::Csv(_) => {
                false
            }
        }
    }
}
