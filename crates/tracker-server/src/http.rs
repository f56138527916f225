//! HTTP route handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracker_core::events::Event;
use tracker_core::now_ms;
use tracker_log::frames::read_frame;
use tracker_log::SessionMeta;
use tracker_supervisor::{ControlOutcome, ServiceName, ServiceStatus};

use crate::control;
use crate::errors::ApiError;
use crate::manifest::{Manifest, manifest};
use crate::server::AppState;

/// `/status` body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service flags.
    #[serde(flatten)]
    pub services: ServiceStatus,
    /// Current session id, if any.
    pub session: Option<String>,
}

/// `/control/session/create` body.
#[derive(Debug, Serialize)]
pub struct CreatedSession {
    /// Always `true`.
    pub success: bool,
    /// New session id.
    pub session: String,
    /// New session directory.
    pub path: String,
}

/// `/control/bookmark` request.
#[derive(Debug, Default, Deserialize)]
pub struct BookmarkRequest {
    /// Bookmark label.
    #[serde(default)]
    pub label: String,
}

/// `/control/bookmark` body.
#[derive(Debug, Serialize)]
pub struct BookmarkResponse {
    /// Always `true`.
    pub success: bool,
    /// The appended record.
    pub event: Event,
}

/// GET /frame/{id}
pub async fn frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let dir = state.sessions.current().await?;
    let bytes = read_frame(&dir.frames, &id).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let session = state
        .sessions
        .current()
        .await
        .ok()
        .map(|dir| dir.id.to_string());
    Json(StatusResponse {
        services: state.status.snapshot(),
        session,
    })
}

/// GET /session
pub async fn session(State(state): State<AppState>) -> Result<Json<SessionMeta>, ApiError> {
    let dir = state.sessions.current().await?;
    Ok(Json(state.sessions.meta(&dir).await?))
}

/// POST /control/{service}/{action}
pub async fn control(
    State(state): State<AppState>,
    Path((service, action)): Path<(String, String)>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let name: ServiceName = service
        .parse()
        .map_err(|_| ApiError::NotFound(format!("unknown service: {service}")))?;
    let outcome = match action.as_str() {
        "start" => control::start_service(&state, name).await,
        "stop" => control::stop_service(&state, name).await,
        other => return Err(ApiError::NotFound(format!("unknown action: {other}"))),
    };
    info!(service = %name, action = %action, success = outcome.success, "control request");
    Ok(Json(outcome))
}

/// POST /control/session/create
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<CreatedSession>, ApiError> {
    let dir = state.sessions.create(Utc::now(), &state.log).await?;
    Ok(Json(CreatedSession {
        success: true,
        session: dir.id.to_string(),
        path: dir.path.display().to_string(),
    }))
}

/// POST /control/bookmark
pub async fn bookmark(
    State(state): State<AppState>,
    body: Result<Json<BookmarkRequest>, JsonRejection>,
) -> Result<Json<BookmarkResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let dir = state.sessions.current().await?;
    let event = Event::bookmark(now_ms(), request.label);
    state.log.append(&dir.events, &event).await?;
    info!(session = %dir.id, "bookmark appended");
    Ok(Json(BookmarkResponse {
        success: true,
        event,
    }))
}

/// GET /mcp.json
pub async fn mcp_manifest() -> Json<Manifest> {
    Json(manifest())
}
