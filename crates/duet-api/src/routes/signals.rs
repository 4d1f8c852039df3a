//! Signal routes — the negotiation mailbox of a match.
//!
//! POST /matches/{match_id}/signals                    — Send a payload to the peer
//! GET  /matches/{match_id}/signals?session_id=…       — Fetch new payloads from the peer
//! GET  /matches/{match_id}/signals?session_id=…&after=N — Re-read without consuming

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use duet_common::{error::DuetResult, validation::validate_request};
use duet_match::{PayloadKind, SignalEnvelope};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::session_id;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/matches/{match_id}/signals",
        get(poll_signals).post(send_signal),
    )
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendSignalRequest {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub session_id: String,
    pub after: Option<i64>,
}

#[derive(Serialize)]
pub struct SendSignalResponse {
    pub seq: i64,
    pub kind: PayloadKind,
}

#[derive(Serialize)]
pub struct PollResponse {
    pub messages: Vec<SignalEnvelope>,
}

async fn send_signal(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<Uuid>,
    Json(body): Json<SendSignalRequest>,
) -> DuetResult<(StatusCode, Json<SendSignalResponse>)> {
    validate_request(&body)?;
    let sender = session_id(body.session_id)?;
    let envelope = state
        .coordinator
        .send_negotiation_message(match_id, &sender, body.payload)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendSignalResponse {
            seq: envelope.seq,
            kind: envelope.kind,
        }),
    ))
}

async fn poll_signals(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<Uuid>,
    Query(query): Query<PollQuery>,
) -> DuetResult<Json<PollResponse>> {
    let me = session_id(query.session_id)?;
    let messages = match query.after {
        Some(after) => state.coordinator.relay().replay(match_id, &me, after).await?,
        None => {
            state
                .coordinator
                .poll_negotiation_messages(match_id, &me)
                .await?
        }
    };
    Ok(Json(PollResponse { messages }))
}
