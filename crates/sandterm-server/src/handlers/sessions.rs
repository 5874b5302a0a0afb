//! Session CRUD handlers (spec.md §6).
//!
//! Shape — `State` + `Path` extractors, `match`-free `?` propagation
//! into `ApiError` — is ported from the teacher's
//! `handlers/sessions.rs`; the auth/ownership checks that wrapped
//! every teacher handler are dropped, since this spec's sessions are
//! anonymous and scoped only by knowledge of their id.

use crate::credentials;
use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sandterm_types::{CreateSessionRequest, ResizeRequest, SessionId, SessionSummary};
use serde::{Deserialize, Serialize};

/// Body shared by `resize` and `delete` (spec.md §6 table).
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: &'static str,
}

const SUCCESS: StatusResponse = StatusResponse { status: "success" };

pub async fn list(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.list().await)
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionSummary>), ApiError> {
    let summary = state.registry.create(&req).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Session summary, optionally carrying a scrollback tail. The tail is
/// opt-in via `?tail=N`; it is omitted unless requested (spec.md §9,
/// Open Question (c)).
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Query(query): Query<TailQuery>,
) -> Result<Json<SessionDetail>, ApiError> {
    let session = state
        .registry
        .get(&id)
        .ok_or_else(|| sandterm_core::Error::NotFound(id.to_string()))?;
    let summary = session.summary().await;
    let tail = if query.tail > 0 {
        Some(
            session
                .tail(query.tail)
                .into_iter()
                .map(|chunk| String::from_utf8_lossy(&chunk).into_owned())
                .collect(),
        )
    } else {
        None
    };
    Ok(Json(SessionDetail { summary, tail }))
}

pub async fn resize(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<ResizeRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.registry.resize(&id, req.cols, req.rows).await?;
    Ok(Json(SUCCESS))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.registry.terminate(&id).await?;
    Ok(Json(SUCCESS))
}

#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    username: String,
    password: String,
}

/// Per-session credentials for the (out-of-scope) WebDAV bridge.
/// Kept for parity with the original deployment's file-access path;
/// derivation only, nothing is stored.
pub async fn credentials(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<CredentialsResponse>, ApiError> {
    if state.registry.get(&id).is_none() {
        return Err(sandterm_core::Error::NotFound(id.to_string()).into());
    }
    Ok(Json(CredentialsResponse {
        username: id.to_string(),
        password: credentials::derive_password(&state.secret_key, &id),
    }))
}

/// `?tail=N` on `GET /sessions/{id}`. Defaults to 0 (no tail, opt-in
/// only) rather than an implicit replay.
#[derive(Debug, Deserialize)]
pub struct TailQuery {
    #[serde(default)]
    pub tail: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub summary: SessionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ScreenResponse {
    rows: Vec<String>,
}

/// Current rendered screen. Distinct from the WebSocket `output`
/// stream: this is a point-in-time snapshot for clients that only
/// need to poll (spec.md §4.3).
pub async fn screen(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<ScreenResponse>, ApiError> {
    let session = state
        .registry
        .get(&id)
        .ok_or_else(|| sandterm_core::Error::NotFound(id.to_string()))?;
    Ok(Json(ScreenResponse {
        rows: session.display(),
    }))
}
