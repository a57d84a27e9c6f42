//! Blocking client for the tile index server.
//!
//! Each worker owns one client. The underlying `reqwest` client keeps
//! connections alive between calls, and every call is bounded by the
//! configured connect and request timeouts.

use std::time::Duration;

use reqwest::{StatusCode, blocking::Response};
use serde::{Deserialize, Serialize};
use tcm_tile_index_models::{
    AddRequest, ApiError, ApiHealth, BoundingBox, IntersectionRequest, IntersectionResponse,
};

use crate::{TileIndexError, server::DEFAULT_PORT};

const fn default_connect_timeout_ms() -> u64 {
    2_000
}

const fn default_timeout_ms() -> u64 {
    10_000
}

fn default_url() -> String {
    format!("http://127.0.0.1:{DEFAULT_PORT}")
}

/// Connection settings for [`TileIndexClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the server, e.g. `http://10.0.0.5:50000`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Shared secret sent as a bearer token.
    #[serde(default)]
    pub secret: String,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            secret: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Typed client for the tile index HTTP API.
pub struct TileIndexClient {
    http: reqwest::blocking::Client,
    base_url: String,
    secret: String,
}

impl TileIndexClient {
    /// Builds a client from `config`. No connection is made yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self, TileIndexError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
        })
    }

    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        if self.secret.is_empty() {
            request
        } else {
            request.bearer_auth(&self.secret)
        }
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response, TileIndexError> {
        let request = self.http.post(format!("{}{path}", self.base_url)).json(body);
        check_status(self.authorize(request).send()?)
    }

    /// Registers a tile's coverage.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable, rejects the secret,
    /// or rejects the box.
    pub fn add(&self, id: &str, bbox: BoundingBox) -> Result<(), TileIndexError> {
        self.post(
            "/add",
            &AddRequest {
                id: id.to_string(),
                bbox,
            },
        )?;
        Ok(())
    }

    /// Ids of every tile whose coverage intersects `bbox`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable, times out, rejects
    /// the secret, or answers with an unexpected body.
    pub fn intersection(&self, bbox: BoundingBox) -> Result<Vec<String>, TileIndexError> {
        let response: IntersectionResponse = self
            .post("/intersection", &IntersectionRequest { bbox })?
            .json()?;
        Ok(response.ids)
    }

    /// Server health and entry count.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or rejects the secret.
    pub fn health(&self) -> Result<ApiHealth, TileIndexError> {
        let request = self.http.get(format!("{}/health", self.base_url));
        Ok(check_status(self.authorize(request).send()?)?.json()?)
    }
}

fn check_status(response: Response) -> Result<Response, TileIndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(TileIndexError::Unauthorized);
    }
    let message = response
        .json::<ApiError>()
        .map_or_else(|_| status.to_string(), |body| body.error);
    Err(TileIndexError::Server {
        status: status.as_u16(),
        message,
    })
}
