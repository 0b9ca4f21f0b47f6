//! HTTP handlers for the upload bridge.

pub mod health_handlers;
pub mod upload_handlers;

use crate::storage::SqliteDriver;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared state carried by the router: the live pool handle and the storage
/// driver. Both are read-only configuration shared across requests; each
/// request gets its own form and session.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub driver: Arc<SqliteDriver>,
}
