//! Participant session model — one anonymous participant's presence.
//!
//! Sessions carry no identity beyond an unguessable token. A session lives
//! from its first heartbeat. An offline session that heartbeats again with
//! the same token goes back to `waiting`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque session token.
///
/// Ordering is plain lexicographic byte order on the token. Both sides of a
/// match can compute it independently, which is what the offer/answer role
/// assignment relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a session is in its lifecycle.
///
/// `waiting → in_call → waiting → ... → offline`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// In the pool, eligible to be paired
    Waiting,
    /// Paired into an open match
    InCall,
    /// Gone until the same token registers again
    Offline,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InCall => "in_call",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "in_call" => Ok(Self::InCall),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// A participant session as persisted by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    /// Last liveness refresh
    pub last_heartbeat: DateTime<Utc>,
    /// Set iff `status == InCall`
    pub match_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, status: SessionStatus, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status,
            last_heartbeat: now,
            match_id: None,
            created_at: now,
        }
    }

    /// Whether the heartbeat is older than `liveness_window` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, liveness_window: chrono::Duration) -> bool {
        now - self.last_heartbeat > liveness_window
    }
}
