//! Typed settings for the coordinator components.
//!
//! Components never read the global config; the binary converts
//! [`AppConfig`] once and tests build these directly.

use chrono::{DateTime, Duration, Utc};
use duet_common::config::AppConfig;
use duet_common::error::{DuetError, DuetResult};

/// Upper bound for every configured window: ten years. Timestamps shifted
/// by a window this size stay inside chrono's range.
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn window(key: &str, secs: u64) -> DuetResult<Duration> {
    (secs <= MAX_WINDOW_SECS)
        .then(|| Duration::try_seconds(secs as i64))
        .flatten()
        .ok_or_else(|| DuetError::Validation {
            message: format!("{key} = {secs} exceeds {MAX_WINDOW_SECS} seconds"),
        })
}

/// How long blacklist entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistPolicy {
    /// Kept for as long as the store keeps the entry.
    Permanent,
    Expiring(Duration),
}

impl BlacklistPolicy {
    /// 0 means permanent.
    pub fn from_ttl_secs(ttl: u64) -> DuetResult<Self> {
        if ttl == 0 {
            Ok(Self::Permanent)
        } else {
            window("moderation.blacklist_ttl_secs", ttl).map(Self::Expiring)
        }
    }

    /// An expiry past the end of representable time is no expiry.
    pub fn expires_at(&self, added_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Permanent => None,
            Self::Expiring(ttl) => added_at.checked_add_signed(*ttl),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Heartbeats older than this are stale.
    pub liveness_window: Duration,
    /// Claim attempts per match-seek call.
    pub max_claim_attempts: u32,
    /// When set, partners met within this window are skipped.
    pub repeat_partner_window: Option<Duration>,
    pub max_payload_bytes: usize,
    /// Signal logs of ended matches are kept this long.
    pub retain_after_end: Duration,
    /// Distinct reporters that trigger blacklisting.
    pub report_threshold: u64,
    pub blacklist: BlacklistPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            liveness_window: Duration::seconds(10),
            max_claim_attempts: 3,
            repeat_partner_window: None,
            max_payload_bytes: 64 * 1024,
            retain_after_end: Duration::seconds(60),
            report_threshold: 3,
            blacklist: BlacklistPolicy::Permanent,
        }
    }
}

/// Rejects windows longer than [`MAX_WINDOW_SECS`].
impl TryFrom<&AppConfig> for Settings {
    type Error = DuetError;

    fn try_from(cfg: &AppConfig) -> DuetResult<Self> {
        let repeat_partner_window = if cfg.matching.avoid_repeat_partners {
            Some(window(
                "matching.repeat_partner_window_secs",
                cfg.matching.repeat_partner_window_secs,
            )?)
        } else {
            None
        };

        Ok(Self {
            liveness_window: window(
                "presence.liveness_window_secs",
                cfg.presence.liveness_window_secs,
            )?,
            max_claim_attempts: cfg.matching.max_claim_attempts.max(1),
            repeat_partner_window,
            max_payload_bytes: cfg.signaling.max_payload_bytes,
            retain_after_end: window(
                "signaling.retain_after_end_secs",
                cfg.signaling.retain_after_end_secs,
            )?,
            report_threshold: u64::from(cfg.moderation.report_threshold.max(1)),
            blacklist: BlacklistPolicy::from_ttl_secs(cfg.moderation.blacklist_ttl_secs)?,
        })
    }
}
