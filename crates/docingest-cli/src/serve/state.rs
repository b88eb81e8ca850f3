use std::sync::Arc;

use docingest_core::IngestEngine;

/// Application state shared across request handlers.
pub struct AppState {
    pub engine: Arc<IngestEngine>,
    /// None = no auth required.
    pub api_key: Option<String>,
    pub max_upload_bytes: usize,
}
