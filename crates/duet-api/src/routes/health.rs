//! Health and stats endpoints — for load balancers and dashboards.

use axum::{Json, Router, extract::State, routing::get};
use duet_common::error::DuetResult;
use duet_db::StoreCounts;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    counts: StoreCounts,
    uptime_secs: u64,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store_ok = state.coordinator.ping().await;

    Json(HealthResponse {
        status: if store_ok { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> DuetResult<Json<StatsResponse>> {
    let counts = state.coordinator.stats().await?;
    Ok(Json(StatsResponse {
        counts,
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}
