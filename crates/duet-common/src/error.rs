//! Centralized error types for Duet.
//!
//! Uses `thiserror` for ergonomic error definitions and provides HTTP-friendly
//! error variants that can be directly converted to API responses.
//!
//! Lost pairing races, stale candidates and unknown matches on `end`/`report`
//! are *not* errors; they surface as empty results from the coordinator.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Core application error type used across all Duet crates.
#[derive(Debug, thiserror::Error)]
pub enum DuetError {
    // === Resource errors ===
    #[error("{resource} not found")]
    NotFound { resource: String },

    // === Validation errors ===
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // === Match membership ===
    #[error("Session is not a participant of this match")]
    NotParticipant,

    #[error("Match has already ended")]
    MatchEnded,

    // === Infrastructure errors ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body sent to clients.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl DuetError {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotParticipant => StatusCode::FORBIDDEN,
            Self::MatchEnded => StatusCode::GONE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code string for programmatic handling by clients.
    pub fn error_code(&self) -> &str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::NotParticipant => "NOT_PARTICIPANT",
            Self::MatchEnded => "MATCH_ENDED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same call on the next poll tick may succeed.
    /// Responses for these carry `Retry-After`.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_))
    }
}

impl IntoResponse for DuetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let transient = self.is_transient();

        // Don't leak internal details to clients
        let message = match &self {
            DuetError::Database(e) => {
                tracing::error!("Database error: {e}");
                "An internal error occurred".to_string()
            }
            DuetError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code().to_string(),
            message,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if transient {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// Convenience type alias for Results using DuetError.
pub type DuetResult<T> = Result<T, DuetError>;
