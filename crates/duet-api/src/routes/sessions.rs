//! Session routes — registration, heartbeats, match polling and leaving.
//!
//! POST   /sessions                    — Enter the waiting pool
//! POST   /sessions/{session_id}/heartbeat — Keep the session live
//! GET    /sessions/{session_id}/match — Current or newly found match
//! DELETE /sessions/{session_id}       — Leave (ends any open call)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use duet_common::{
    error::DuetResult,
    models::{Session, SessionId},
    validation::validate_request,
};
use duet_match::MatchResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::session_id;
use crate::{AppState, ClientIntervals};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(start_waiting))
        .route("/sessions/{session_id}", delete(leave))
        .route("/sessions/{session_id}/heartbeat", post(heartbeat))
        .route("/sessions/{session_id}/match", get(poll_for_match))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct StartSessionRequest {
    /// Reuse a token; omit to have one generated.
    #[validate(length(min = 1, max = 128))]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct StartSessionResponse {
    pub session: Session,
    #[serde(flatten)]
    pub intervals: ClientIntervals,
}

#[derive(Serialize)]
pub struct MatchResponse {
    #[serde(rename = "match")]
    pub current: Option<MatchResult>,
}

// ============================================================
// POST /sessions
// ============================================================

async fn start_waiting(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartSessionRequest>,
) -> DuetResult<(StatusCode, Json<StartSessionResponse>)> {
    validate_request(&body)?;
    let id = body.session_id.map(session_id).transpose()?;
    let session = state.coordinator.start_waiting(id).await?;

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session,
            intervals: state.intervals,
        }),
    ))
}

// ============================================================
// POST /sessions/{session_id}/heartbeat
// ============================================================

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> DuetResult<Json<Session>> {
    let id = session_id(raw)?;
    Ok(Json(state.coordinator.heartbeat(&id).await?))
}

// ============================================================
// GET /sessions/{session_id}/match
// ============================================================

async fn poll_for_match(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> DuetResult<Json<MatchResponse>> {
    let id: SessionId = session_id(raw)?;
    let current = state.coordinator.poll_for_match(&id).await?;
    Ok(Json(MatchResponse { current }))
}

// ============================================================
// DELETE /sessions/{session_id}
// ============================================================

async fn leave(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> DuetResult<StatusCode> {
    let id = session_id(raw)?;
    state.coordinator.leave(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
