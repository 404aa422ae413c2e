use std::sync::Arc;

use journal_db::DbPool;
use journal_pipeline::engine::JobEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone; everything is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// `None` when running on in-memory stores.
    pub pool: Option<DbPool>,
    pub config: Arc<ServerConfig>,
    pub engine: Arc<JobEngine>,
}
