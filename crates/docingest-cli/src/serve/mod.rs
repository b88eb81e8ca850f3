//! `docingest serve`: the REST surface of the ingest engine.
//!
//! Every route lives under `/ingest` except `GET /health`, which is exempt
//! from authentication. Engine calls block (SQLite, filesystem), so handlers
//! run them through `spawn_blocking`.

mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use docingest_core::config::ServerConfig;
use docingest_core::{Error, IngestEngine};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use self::handlers::*;
use self::middleware::auth_middleware;
use self::state::AppState;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyRolledBack(_) | Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &Error) -> axum::response::Response {
    json_error(status_for(error), &error.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest/upload", post(handle_upload))
        .route("/ingest/processing/start", post(handle_start))
        .route("/ingest/processing/jobs", get(handle_list_jobs))
        .route("/ingest/processing/jobs/{id}", get(handle_get_job))
        .route("/ingest/processing/stats", get(handle_stats))
        .route("/ingest/processing/stop", post(handle_stop))
        .route("/ingest/processing/resume/{id}", post(handle_resume))
        .route("/ingest/processing/rollback/{id}", post(handle_rollback_job))
        .route("/ingest/snapshots", get(handle_list_snapshots))
        .route("/ingest/snapshots/{id}/rollback", post(handle_rollback_snapshot))
        .route("/ingest/duplicates", get(handle_list_duplicates))
        .route("/ingest/duplicates/promote", post(handle_promote))
        .route("/ingest/duplicates/move", post(handle_move_duplicate))
        .route("/ingest/duplicates/delete", post(handle_delete))
        .route("/ingest/classification/pending", get(handle_pending))
        .route("/ingest/classification/confirm", post(handle_confirm))
        .route("/ingest/classification/download", get(handle_download))
        .route("/ingest/retention/purge", post(handle_purge))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub async fn start_server(
    engine: Arc<IngestEngine>,
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let api_key = config.api_key.filter(|k| !k.is_empty());
    if api_key.is_some() {
        info!("API key authentication enabled");
    } else {
        warn!("No server.api_key configured, the API is open to every client");
    }

    let state = Arc::new(AppState {
        engine: Arc::clone(&engine),
        api_key,
        max_upload_bytes: config.max_upload_bytes,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("docingest listening on http://{}", config.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let stopped = engine.stop_all();
    if !stopped.is_empty() {
        info!("Waiting for {} running job(s) to stop", stopped.len());
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || {
            for job_id in stopped {
                let _ = engine.wait(job_id);
            }
        })
        .await?;
    }
    info!("Server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
