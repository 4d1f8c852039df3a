//! Match model — a pairing of exactly two sessions for one call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::SessionId;
use crate::error::{DuetError, DuetResult};

/// A call between two sessions.
///
/// `session_a` is the requester that won the pairing, `session_b` the
/// candidate it claimed. Once `ended_at` is set the match never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// UUID v7, sortable by creation time
    pub id: Uuid,
    pub session_a: SessionId,
    pub session_b: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// `ended_at - started_at` in whole seconds, set together with `ended_at`
    pub duration_secs: Option<i64>,
}

impl Match {
    /// Open a new match. The two sides must differ.
    pub fn open(
        id: Uuid,
        session_a: SessionId,
        session_b: SessionId,
        started_at: DateTime<Utc>,
    ) -> DuetResult<Self> {
        if session_a == session_b {
            return Err(DuetError::Validation {
                message: "A match needs two distinct sessions".into(),
            });
        }
        Ok(Self {
            id,
            session_a,
            session_b,
            started_at,
            ended_at: None,
            duration_secs: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn involves(&self, session: &SessionId) -> bool {
        self.session_a == *session || self.session_b == *session
    }

    /// The other side of the match, if `session` is one of its participants.
    pub fn peer_of(&self, session: &SessionId) -> Option<&SessionId> {
        if self.session_a == *session {
            Some(&self.session_b)
        } else if self.session_b == *session {
            Some(&self.session_a)
        } else {
            None
        }
    }

    /// Stamp the end time and duration. Returns `false` if already ended.
    pub fn close(&mut self, ended_at: DateTime<Utc>) -> bool {
        if self.ended_at.is_some() {
            return false;
        }
        // Clock skew between replicas must not produce a negative duration.
        let ended_at = ended_at.max(self.started_at);
        self.ended_at = Some(ended_at);
        self.duration_secs = Some((ended_at - self.started_at).num_seconds());
        true
    }
}
