//! Defines routes for the upload bridge.
//!
//! ## Structure
//! - `POST /uploads` — parse a multipart form; file parts stream into storage
//! - `GET  /files/{id}` — stream a stored file back
//! - `HEAD /files/{id}` — metadata headers only
//! - `GET  /healthz`, `GET /readyz` — probes

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    upload_handlers::{get_file, head_file, store_upload},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the upload bridge.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload + read-back
        .route("/uploads", post(store_upload))
        .route("/files/{id}", get(get_file).head(head_file))
}
