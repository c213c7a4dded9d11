use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;

use crate::state::AppState;

/// GET /v1/health: liveness plus a count of active sessions and open
/// connections.  Answers 503 when the store is unreachable.
pub async fn health(State(state): State<AppState>) -> Response {
    let connections = state.coordinator.hub.connection_count();
    let connected_sessions = state.coordinator.hub.session_count();
    match state.coordinator.sessions.active_sessions().await {
        Ok(sessions) => Json(serde_json::json!({
            "status": "ok",
            "active_sessions": sessions.len(),
            "connections": connections,
            "connected_sessions": connected_sessions,
            "timestamp": Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "degraded",
                "error": e.to_string(),
                "active_sessions": null,
                "connections": connections,
                "timestamp": Utc::now(),
            })),
        )
            .into_response(),
    }
}
