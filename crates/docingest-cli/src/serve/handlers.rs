//! Route handlers. Each one validates its input, runs the engine call on the
//! blocking pool and maps the result to JSON.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use docingest_core::model::JobOptions;
use docingest_core::storage::ReviewFilter;
use docingest_core::IngestEngine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::state::AppState;
use super::{error_response, json_error};

const DEFAULT_PAGE: i64 = 50;

/// Run `op` against the engine on the blocking pool and answer with its
/// JSON result or the mapped error.
async fn run_blocking<T, F>(state: &AppState, op: F) -> Response
where
    F: FnOnce(&IngestEngine) -> docingest_core::Result<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    match tokio::task::spawn_blocking(move || op(&engine)).await {
        Ok(Ok(value)) => (StatusCode::OK, Json(value)).into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("task join error: {}", e),
        ),
    }
}

#[derive(Serialize)]
struct Page<T> {
    items: Vec<T>,
    total: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })),
    )
}

// ── Intake ───────────────────────────────────────────────────────

/// POST /ingest/upload
pub(crate) async fn handle_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut uploads: Vec<(String, Vec<u8>)> = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()),
        };
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        match field.bytes().await {
            Ok(bytes) => uploads.push((name, bytes.to_vec())),
            Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()),
        }
    }
    if uploads.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "no files in upload");
    }

    run_blocking(&state, move |engine| {
        Ok(engine.stage_uploads(
            uploads
                .iter()
                .map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
        ))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartRequest {
    files: Vec<PathBuf>,
    #[serde(default)]
    config: JobOptions,
}

/// POST /ingest/processing/start
pub(crate) async fn handle_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Response {
    if req.files.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "'files' must not be empty");
    }
    run_blocking(&state, move |engine| engine.submit(&req.files, req.config)).await
}

// ── Jobs ─────────────────────────────────────────────────────────

/// GET /ingest/processing/jobs
pub(crate) async fn handle_list_jobs(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> Response {
    run_blocking(&state, move |engine| {
        let (items, total) = engine.jobs(
            page.offset.unwrap_or(0),
            page.limit.unwrap_or(DEFAULT_PAGE),
        )?;
        Ok(Page { items, total })
    })
    .await
}

/// GET /ingest/processing/jobs/{id}
pub(crate) async fn handle_get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    run_blocking(&state, move |engine| engine.job(id)).await
}

/// GET /ingest/processing/stats
pub(crate) async fn handle_stats(State(state): State<Arc<AppState>>) -> Response {
    run_blocking(&state, |engine| engine.stats()).await
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StopRequest {
    #[serde(default, alias = "jobId")]
    job_id: Option<i64>,
}

/// POST /ingest/processing/stop
pub(crate) async fn handle_stop(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StopRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    run_blocking(&state, move |engine| {
        let stopped = match req.job_id {
            Some(id) => {
                if engine.stop(id)? {
                    vec![id]
                } else {
                    Vec::new()
                }
            }
            None => engine.stop_all(),
        };
        Ok(json!({ "stopped": stopped }))
    })
    .await
}

/// POST /ingest/processing/resume/{id}
pub(crate) async fn handle_resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    run_blocking(&state, move |engine| engine.resume(id)).await
}

/// POST /ingest/processing/rollback/{id}
pub(crate) async fn handle_rollback_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    run_blocking(&state, move |engine| engine.rollback_job(id)).await
}

// ── Snapshots ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotQuery {
    #[serde(alias = "jobId")]
    job_id: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// GET /ingest/snapshots
pub(crate) async fn handle_list_snapshots(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SnapshotQuery>,
) -> Response {
    run_blocking(&state, move |engine| {
        let (items, total) = engine.snapshots(
            q.job_id,
            q.offset.unwrap_or(0),
            q.limit.unwrap_or(DEFAULT_PAGE),
        )?;
        Ok(Page { items, total })
    })
    .await
}

/// POST /ingest/snapshots/{id}/rollback
pub(crate) async fn handle_rollback_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    run_blocking(&state, move |engine| engine.rollback_snapshot(id)).await
}

// ── Duplicates ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct DuplicateQuery {
    customer: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// GET /ingest/duplicates
pub(crate) async fn handle_list_duplicates(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DuplicateQuery>,
) -> Response {
    run_blocking(&state, move |engine| {
        let (items, total) = engine.duplicates(
            q.customer.as_deref(),
            q.offset.unwrap_or(0).max(0) as usize,
            q.limit.unwrap_or(DEFAULT_PAGE).max(0) as usize,
        );
        Ok(Page {
            items,
            total: total as i64,
        })
    })
    .await
}

#[derive(Debug, Deserialize)]
pub(crate) struct PathRequest {
    path: PathBuf,
}

/// POST /ingest/duplicates/promote
pub(crate) async fn handle_promote(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PathRequest>,
) -> Response {
    run_blocking(&state, move |engine| engine.promote(&req.path)).await
}

#[derive(Debug, Deserialize)]
pub(crate) struct MoveRequest {
    path: PathBuf,
    #[serde(alias = "targetDir")]
    target_dir: PathBuf,
}

/// POST /ingest/duplicates/move
pub(crate) async fn handle_move_duplicate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MoveRequest>,
) -> Response {
    run_blocking(&state, move |engine| {
        let moved = engine.move_duplicate(&req.path, &req.target_dir)?;
        Ok(json!({ "moved": req.path, "destination": moved.destination }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteRequest {
    paths: Vec<PathBuf>,
}

/// POST /ingest/duplicates/delete
pub(crate) async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> Response {
    run_blocking(&state, move |engine| Ok(engine.delete(&req.paths))).await
}

// ── Classification review ────────────────────────────────────────

/// GET /ingest/classification/pending
pub(crate) async fn handle_pending(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ReviewFilter>,
) -> Response {
    run_blocking(&state, move |engine| {
        let items = engine.pending(&filter)?;
        Ok(Page {
            total: items.len() as i64,
            items,
        })
    })
    .await
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfirmRequest {
    id: i64,
    category: String,
}

/// POST /ingest/classification/confirm
pub(crate) async fn handle_confirm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmRequest>,
) -> Response {
    run_blocking(&state, move |engine| engine.confirm(req.id, &req.category)).await
}

#[derive(Debug, Deserialize)]
pub(crate) struct DownloadQuery {
    id: i64,
}

/// GET /ingest/classification/download
pub(crate) async fn handle_download(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DownloadQuery>,
) -> Response {
    let engine = Arc::clone(&state.engine);
    match tokio::task::spawn_blocking(move || engine.download(q.id)).await {
        Ok(Ok((item, bytes))) => {
            let disposition = format!(
                "attachment; filename=\"{}\"",
                item.filename.replace('"', "")
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Ok(Err(e)) => error_response(&e),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("task join error: {}", e),
        ),
    }
}

// ── Retention ────────────────────────────────────────────────────

/// POST /ingest/retention/purge
pub(crate) async fn handle_purge(State(state): State<Arc<AppState>>) -> Response {
    run_blocking(&state, |engine| engine.purge_expired()).await
}

#[cfg(test)]
mod tests {
    use super::super::status_for;
    use super::*;
    use docingest_core::Error;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&Error::NotFound("job 9".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for(&Error::AlreadyRolledBack(3)), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&Error::InvalidState("running".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::InvalidArgument("batchSize".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Error::LedgerWrite("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_start_request_accepts_dashboard_config() {
        let req: StartRequest = serde_json::from_value(json!({
            "files": ["/in/a.pdf"],
            "config": { "enableClassification": false, "batchSize": 5 }
        }))
        .unwrap();
        assert_eq!(req.files, vec![PathBuf::from("/in/a.pdf")]);
        assert_eq!(req.config.enable_classification, Some(false));
        assert_eq!(req.config.batch_size, Some(5));

        let bare: StartRequest = serde_json::from_value(json!({ "files": [] })).unwrap();
        assert!(bare.config.scope.is_none());
    }
}
