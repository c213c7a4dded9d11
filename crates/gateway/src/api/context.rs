//! Remote document context sync.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use leitl_contextsync::ContextSyncRequest;

use crate::state::AppState;

use super::{api_error, ApiJson};

/// POST /v1/context/sync
///
/// Always answers 200 with a `ContextSyncResult` once the request is
/// valid; remote failures are reported in its `error` field.
pub async fn sync(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ContextSyncRequest>,
) -> Response {
    let source = body.source_url.trim();
    if source.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "source_url is required");
    }
    if !(source.starts_with("http://") || source.starts_with("https://")) {
        return api_error(
            StatusCode::BAD_REQUEST,
            "source_url must be an http(s) URL",
        );
    }

    let result = state.coordinator.context.sync_and_get(&body).await;
    Json(result).into_response()
}
