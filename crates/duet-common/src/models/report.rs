//! Moderation models — reports against a match and the resulting blacklist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::session::SessionId;

/// Why a participant reported a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    Nudity,
    Harassment,
    Spam,
    Underage,
    Other,
}

impl ReportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nudity => "nudity",
            Self::Harassment => "harassment",
            Self::Spam => "spam",
            Self::Underage => "underage",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nudity" => Ok(Self::Nudity),
            "harassment" => Ok(Self::Harassment),
            "spam" => Ok(Self::Spam),
            "underage" => Ok(Self::Underage),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown report category: {other}")),
        }
    }
}

/// Append-only report record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub match_id: Uuid,
    pub reporter: SessionId,
    pub category: ReportCategory,
    pub created_at: DateTime<Utc>,
}

/// A session excluded from candidate selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub session_id: SessionId,
    pub added_at: DateTime<Utc>,
    /// `None` means the entry never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlacklistEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}
