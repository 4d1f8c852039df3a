//! # duet-api
//!
//! REST API layer for Duet. Clients poll these endpoints to register,
//! find a partner, exchange connection-negotiation messages and hang up.

pub mod middleware;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use duet_common::config::AppConfig;
use duet_match::Coordinator;
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;

/// Polling cadence advertised to clients when they register.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClientIntervals {
    pub heartbeat_interval_secs: u64,
    pub liveness_window_secs: u64,
    pub match_poll_interval_secs: u64,
    pub signal_poll_interval_ms: u64,
}

impl From<&AppConfig> for ClientIntervals {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            heartbeat_interval_secs: cfg.presence.heartbeat_interval_secs,
            liveness_window_secs: cfg.presence.liveness_window_secs,
            match_poll_interval_secs: cfg.matching.poll_interval_secs,
            signal_poll_interval_ms: cfg.signaling.poll_interval_ms,
        }
    }
}

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub intervals: ClientIntervals,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(coordinator: Coordinator, intervals: ClientIntervals) -> Self {
        Self {
            coordinator,
            intervals,
            started_at: Instant::now(),
        }
    }
}

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Leave headroom over the payload cap for the envelope around it.
    let body_limit = state.coordinator.settings().max_payload_bytes * 2 + 4096;

    let api_routes = Router::new()
        .merge(routes::sessions::router())
        .merge(routes::matches::router())
        .merge(routes::signals::router())
        .merge(routes::health::router());

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::compression::CompressionLayer::new())
        .with_state(Arc::new(state))
}
