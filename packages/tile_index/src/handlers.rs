//! HTTP handler functions for the tile index API.

use actix_web::{HttpRequest, HttpResponse, http::header, web};
use tcm_tile_index_models::{
    AddRequest, ApiError, ApiHealth, IntersectionRequest, IntersectionResponse,
};

use crate::server::ServerState;

fn error_body(message: impl Into<String>) -> ApiError {
    ApiError {
        error: message.into(),
    }
}

/// Returns a `401` response unless the request carries the shared secret
/// as a bearer token. An empty secret accepts every request.
fn reject_unauthorized(req: &HttpRequest, state: &ServerState) -> Option<HttpResponse> {
    if state.secret.is_empty() {
        return None;
    }
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if token == Some(state.secret.as_str()) {
        None
    } else {
        log::warn!(
            "Rejected unauthenticated request to {} from {:?}",
            req.path(),
            req.peer_addr()
        );
        Some(HttpResponse::Unauthorized().json(error_body("invalid or missing bearer token")))
    }
}

fn lock_poisoned() -> HttpResponse {
    log::error!("Tile index lock is poisoned");
    HttpResponse::InternalServerError().json(error_body("tile index unavailable"))
}

/// `GET /health`
pub async fn health(req: HttpRequest, state: web::Data<ServerState>) -> HttpResponse {
    if let Some(response) = reject_unauthorized(&req, &state) {
        return response;
    }
    let Ok(index) = state.index.read() else {
        return lock_poisoned();
    };
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        entries: index.len(),
    })
}

/// `POST /add`
///
/// Inserts one entry under the write lock.
pub async fn add(
    req: HttpRequest,
    state: web::Data<ServerState>,
    body: web::Json<AddRequest>,
) -> HttpResponse {
    if let Some(response) = reject_unauthorized(&req, &state) {
        return response;
    }
    let AddRequest { id, bbox } = body.into_inner();
    let Ok(mut index) = state.index.write() else {
        return lock_poisoned();
    };

    match index.add(id, &bbox) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => {
            log::warn!("Rejected add: {e}");
            HttpResponse::BadRequest().json(error_body(e.to_string()))
        }
    }
}

/// `POST /intersection`
///
/// Returns the sorted ids of every entry intersecting the query box.
pub async fn intersection(
    req: HttpRequest,
    state: web::Data<ServerState>,
    body: web::Json<IntersectionRequest>,
) -> HttpResponse {
    if let Some(response) = reject_unauthorized(&req, &state) {
        return response;
    }
    let Ok(index) = state.index.read() else {
        return lock_poisoned();
    };
    HttpResponse::Ok().json(IntersectionResponse {
        ids: index.intersection(&body.bbox),
    })
}
