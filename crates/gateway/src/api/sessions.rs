//! Session endpoints: register, list, inspect, heartbeat, end.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::coordinator::sessions::{EndOutcome, HeartbeatOutcome, RegisterRequest};
use crate::state::AppState;

use super::{api_error, error_response, ApiJson};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/leitl/register
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Register an agent and return its session id plus the WebSocket path
/// to connect to.
pub async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Response {
    let session = match state.coordinator.sessions.register(body).await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };

    let endpoint = connection_endpoint(
        state.config.server.public_base_url.as_deref(),
        &session.session_id,
    );
    Json(serde_json::json!({
        "session_id": session.session_id,
        "connection_endpoint": endpoint,
        "agent_name": session.agent_name,
        "started_at": session.started_at,
    }))
    .into_response()
}

/// `<public_base_url>/v1/leitl/ws/<id>`, or just the path when no public
/// base URL is configured.
pub fn connection_endpoint(public_base_url: Option<&str>, session_id: &str) -> String {
    let path = format!("/v1/leitl/ws/{session_id}");
    match public_base_url.map(|b| b.trim_end_matches('/')) {
        Some(base) if !base.is_empty() => format!("{base}{path}"),
        _ => path,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/leitl/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    match state.coordinator.sessions.active_sessions().await {
        Ok(sessions) => Json(serde_json::json!({
            "total": sessions.len(),
            "sessions": sessions,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/leitl/sessions/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.coordinator.sessions.require(&session_id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/leitl/heartbeat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub session_id: String,
    #[serde(default)]
    pub current_task: Option<String>,
}

/// Always `{status: "ok"}` on success, including for unknown sessions:
/// a heartbeat racing with expiry is not the caller's fault.
pub async fn heartbeat(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<HeartbeatBody>,
) -> Response {
    if body.session_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "session_id is required");
    }
    match state
        .coordinator
        .sessions
        .heartbeat(&body.session_id, body.current_task)
        .await
    {
        Ok(HeartbeatOutcome::Refreshed(_)) | Ok(HeartbeatOutcome::UnknownSession) => {
            Json(serde_json::json!({ "status": "ok" })).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/leitl/end
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct EndBody {
    pub session_id: String,
}

/// Idempotent: ending an unknown session also answers `ended`.
pub async fn end_session(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<EndBody>,
) -> Response {
    if body.session_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "session_id is required");
    }
    match state
        .coordinator
        .sessions
        .end(&body.session_id, "client_request")
        .await
    {
        Ok(EndOutcome::Ended { .. }) | Ok(EndOutcome::AlreadyEnded) => {
            Json(serde_json::json!({ "status": "ended" })).into_response()
        }
        Err(e) => error_response(e),
    }
}
