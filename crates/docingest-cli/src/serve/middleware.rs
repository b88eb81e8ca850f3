use std::sync::Arc;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use super::json_error;
use super::state::AppState;

/// API key authentication middleware.
///
/// When an API key is configured, every request except `/health` must carry
/// `Authorization: Bearer <key>` or `X-API-Key: <key>`.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let expected_key = match &state.api_key {
        Some(k) => k,
        None => return next.run(request).await,
    };

    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    match bearer.or(header_key) {
        Some(key) if key == expected_key => next.run(request).await,
        Some(_) => json_error(StatusCode::FORBIDDEN, "invalid API key"),
        None => json_error(StatusCode::UNAUTHORIZED, "authentication required"),
    }
}
