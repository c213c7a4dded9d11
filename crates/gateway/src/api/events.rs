//! Broadcast and event-log endpoints.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use leitl_protocol::EventData;

use crate::state::AppState;

use super::{api_error, error_response, ApiJson};

const DEFAULT_LIMIT: usize = 50;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/leitl/broadcast
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct BroadcastBody {
    pub session_id: String,
    pub event_type: String,
    #[serde(default)]
    pub data: Option<EventData>,
}

/// Publish an event to every connected agent.
pub async fn broadcast(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<BroadcastBody>,
) -> Response {
    if body.session_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "session_id is required");
    }
    if body.event_type.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "event_type is required");
    }

    state
        .coordinator
        .events
        .broadcast(&body.event_type, &body.session_id, body.data.unwrap_or_default())
        .await;
    Json(serde_json::json!({ "status": "broadcasted" })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/leitl/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn recent_messages(
    State(state): State<AppState>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> Response {
    let Query(q) = match query {
        Ok(q) => q,
        Err(rejection) => return api_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match state
        .coordinator
        .events
        .recent_messages(q.limit.unwrap_or(DEFAULT_LIMIT))
        .await
    {
        Ok(messages) => Json(serde_json::json!({
            "count": messages.len(),
            "messages": messages,
        }))
        .into_response(),
        Err(e) => error_response(e.into()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/leitl/activity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    /// RFC 3339 timestamp; only strictly newer events are returned.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn activity_log(
    State(state): State<AppState>,
    query: Result<Query<ActivityQuery>, QueryRejection>,
) -> Response {
    let Query(q) = match query {
        Ok(q) => q,
        Err(rejection) => return api_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match state
        .coordinator
        .events
        .activity_log(q.since, q.limit.unwrap_or(DEFAULT_LIMIT))
        .await
    {
        Ok(activities) => Json(serde_json::json!({
            "count": activities.len(),
            "activities": activities,
        }))
        .into_response(),
        Err(e) => error_response(e.into()),
    }
}
