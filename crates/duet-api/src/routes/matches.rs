//! Match routes — hanging up and reporting.
//!
//! POST /matches/{match_id}/end     — End the call (idempotent)
//! POST /matches/{match_id}/reports — Report the match

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use duet_common::{
    error::DuetResult,
    models::{Match, ReportCategory},
    validation::validate_request,
};
use duet_match::{EndOutcome, ReportOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::session_id;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/matches/{match_id}/end", post(end_call))
        .route("/matches/{match_id}/reports", post(report_match))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReportRequest {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,
    pub category: ReportCategory,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndStatus {
    Ended,
    AlreadyEnded,
    Unknown,
}

#[derive(Serialize)]
pub struct EndResponse {
    pub status: EndStatus,
    #[serde(rename = "match")]
    pub call: Option<Match>,
}

impl From<EndOutcome> for EndResponse {
    fn from(outcome: EndOutcome) -> Self {
        match outcome {
            EndOutcome::Ended(m) => Self {
                status: EndStatus::Ended,
                call: Some(m),
            },
            EndOutcome::AlreadyEnded(m) => Self {
                status: EndStatus::AlreadyEnded,
                call: Some(m),
            },
            EndOutcome::Unknown => Self {
                status: EndStatus::Unknown,
                call: None,
            },
        }
    }
}

// ============================================================
// POST /matches/{match_id}/end
// ============================================================

async fn end_call(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<Uuid>,
) -> DuetResult<Json<EndResponse>> {
    let outcome = state.coordinator.end_call(match_id).await?;
    Ok(Json(outcome.into()))
}

// ============================================================
// POST /matches/{match_id}/reports
// ============================================================

async fn report_match(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<Uuid>,
    Json(body): Json<ReportRequest>,
) -> DuetResult<Json<ReportOutcome>> {
    validate_request(&body)?;
    let reporter = session_id(body.session_id)?;
    let outcome = state
        .coordinator
        .report_match(match_id, &reporter, body.category)
        .await?;
    Ok(Json(outcome))
}
