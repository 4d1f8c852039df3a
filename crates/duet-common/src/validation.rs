//! Input validation utilities.
//!
//! Centralized validation helpers used by the coordinator and API routes.

use std::sync::LazyLock;

use regex::Regex;
use validator::Validate;

use crate::error::DuetError;

/// Longest client-supplied session token we accept.
pub const MAX_SESSION_ID_LEN: usize = 128;

static SESSION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex is valid")
});

/// Validate a request body, returning a DuetError::Validation on failure.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), DuetError> {
    body.validate().map_err(|e| DuetError::Validation {
        message: format_validation_errors(e),
    })
}

/// Format validation errors into a human-readable string.
fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a session token: non-empty, bounded, URL-safe characters only.
pub fn validate_session_id(token: &str) -> Result<(), DuetError> {
    if token.is_empty() || token.len() > MAX_SESSION_ID_LEN {
        return Err(DuetError::Validation {
            message: format!("Session ID must be 1-{MAX_SESSION_ID_LEN} characters"),
        });
    }

    if !SESSION_ID_RE.is_match(token) {
        return Err(DuetError::Validation {
            message: "Session ID can only contain letters, numbers, hyphens and underscores"
                .into(),
        });
    }

    Ok(())
}
