//! API route modules.

pub mod health;
pub mod matches;
pub mod sessions;
pub mod signals;

use duet_common::{error::DuetResult, models::SessionId, validation::validate_session_id};

/// Validate a client-supplied session token.
pub(crate) fn session_id(raw: String) -> DuetResult<SessionId> {
    validate_session_id(&raw)?;
    Ok(SessionId::new(raw))
}
