//! Actix-Web server holding one shared [`TileIndex`].
//!
//! The index sits behind an `RwLock`: `add` takes the write lock and
//! every query takes the read lock, so a reader never sees a partially
//! inserted entry even when construction and serving overlap.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::{TileIndex, handlers};

/// Default port, shared by the server and client defaults.
pub const DEFAULT_PORT: u16 = 50_000;

/// The index as shared between server workers.
pub type SharedIndex = Arc<RwLock<TileIndex>>;

/// Application state handed to every handler.
pub struct ServerState {
    /// The shared index.
    pub index: SharedIndex,
    /// Bearer token clients must present; empty disables the check.
    pub secret: String,
}

impl ServerState {
    /// Wraps `index` for serving.
    #[must_use]
    pub fn new(index: TileIndex, secret: String) -> Self {
        Self {
            index: Arc::new(RwLock::new(index)),
            secret,
        }
    }
}

/// Where and how to serve.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind, e.g. `127.0.0.1` or `0.0.0.0`.
    pub bind_addr: String,
    /// Port to bind; `0` picks a free one.
    pub port: u16,
    /// Shared secret.
    pub secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            secret: String::new(),
        }
    }
}

/// Registers the tile index routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .route("/add", web::post().to(handlers::add))
        .route("/intersection", web::post().to(handlers::intersection));
}

/// Binds the server without running it, returning the bound addresses.
///
/// Must be called from within an actix `System`.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub fn bind_server(
    index: TileIndex,
    config: &ServerConfig,
) -> std::io::Result<(Server, Vec<SocketAddr>)> {
    if config.secret.is_empty() {
        log::warn!("Tile index secret is empty; requests will not be authenticated");
    }

    let entries = index.len();
    let state = web::Data::new(ServerState::new(index, config.secret.clone()));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?;

    let addrs = server.addrs();
    for addr in &addrs {
        log::info!("Tile index server listening on {addr} ({entries} entries)");
    }

    Ok((server.run(), addrs))
}

/// Serves `index` until the server is stopped.
///
/// The caller provides the runtime, e.g. via
/// `actix_web::rt::System::new().block_on(..)`.
///
/// # Errors
///
/// Returns an error if the server fails to bind or encounters a runtime
/// error.
#[allow(clippy::future_not_send)]
pub async fn run_server(index: TileIndex, config: ServerConfig) -> std::io::Result<()> {
    let (server, _) = bind_server(index, &config)?;
    server.await
}
