pub mod context;
pub mod events;
pub mod health;
pub mod sessions;

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;

use leitl_domain::Error;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health
        .route("/v1/health", get(health::health))
        // Sessions
        .route("/v1/leitl/register", post(sessions::register))
        .route("/v1/leitl/sessions", get(sessions::list_sessions))
        .route("/v1/leitl/sessions/:session_id", get(sessions::get_session))
        .route("/v1/leitl/heartbeat", post(sessions::heartbeat))
        .route("/v1/leitl/end", post(sessions::end_session))
        // Events
        .route("/v1/leitl/broadcast", post(events::broadcast))
        .route("/v1/leitl/messages", get(events::recent_messages))
        .route("/v1/leitl/activity", get(events::activity_log))
        // Live connections
        .route("/v1/leitl/ws/:session_id", get(crate::connections::ws::session_ws))
        // Remote document context
        .route("/v1/context/sync", post(context::sync))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a domain error onto an HTTP status.  Store trouble is reported as
/// 503 so callers know to retry later.
pub fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::InvalidRequest(_) | Error::Json(_) | Error::Protocol(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Timeout(_) | Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Http(_) => StatusCode::BAD_GATEWAY,
        Error::Config(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if e.is_transient() {
        tracing::warn!(status = status.as_u16(), error = %e, "request failed, retryable");
    } else if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %e, "request failed");
    }
    api_error(status, e.to_string())
}

/// JSON body extractor whose rejections use the `{error}` shape with 400.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> Response {
    api_error(StatusCode::BAD_REQUEST, rejection.body_text())
}
