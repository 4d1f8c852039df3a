//! Call lifecycle — ending matches and moderation reports.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use duet_common::{
    error::DuetResult,
    ids::generate_id,
    models::{Match, Report, ReportCategory, SessionId},
};
use duet_db::{CloseOutcome, SessionStore};
use serde::Serialize;
use uuid::Uuid;

use crate::settings::{BlacklistPolicy, Settings};

/// Result of ending a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOutcome {
    /// This call ended the match.
    Ended(Match),
    /// The match had already ended; nothing changed.
    AlreadyEnded(Match),
    Unknown,
}

impl EndOutcome {
    pub fn call(&self) -> Option<&Match> {
        match self {
            Self::Ended(m) | Self::AlreadyEnded(m) => Some(m),
            Self::Unknown => None,
        }
    }
}

impl From<CloseOutcome> for EndOutcome {
    fn from(outcome: CloseOutcome) -> Self {
        match outcome {
            CloseOutcome::Closed(m) => Self::Ended(m),
            CloseOutcome::AlreadyEnded(m) => Self::AlreadyEnded(m),
            CloseOutcome::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportOutcome {
    /// `false` when the match id is unknown.
    pub recorded: bool,
    /// Distinct reporters on this match, including this one.
    pub distinct_reports: u64,
    /// Both participants are now blacklisted.
    pub blacklisted: bool,
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn SessionStore>,
    report_threshold: u64,
    blacklist: BlacklistPolicy,
    retain_after_end: Duration,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn SessionStore>, settings: &Settings) -> Self {
        Self {
            store,
            report_threshold: settings.report_threshold,
            blacklist: settings.blacklist,
            retain_after_end: settings.retain_after_end,
        }
    }

    pub async fn end(&self, match_id: Uuid) -> DuetResult<EndOutcome> {
        self.end_at(match_id, Utc::now()).await
    }

    /// End the match at `ended_at`. Idempotent: only the first call stamps
    /// the end time, returns both participants to waiting, and counts.
    pub async fn end_at(&self, match_id: Uuid, ended_at: DateTime<Utc>) -> DuetResult<EndOutcome> {
        let outcome = EndOutcome::from(self.store.close_match(match_id, ended_at).await?);
        match &outcome {
            EndOutcome::Ended(m) => tracing::info!(
                match_id = %m.id,
                session_a = %m.session_a,
                session_b = %m.session_b,
                duration_secs = m.duration_secs.unwrap_or_default(),
                "Call ended"
            ),
            EndOutcome::AlreadyEnded(_) => {
                tracing::debug!(match_id = %match_id, "Call already ended")
            }
            EndOutcome::Unknown => tracing::debug!(match_id = %match_id, "End for unknown match"),
        }
        Ok(outcome)
    }

    pub async fn report(
        &self,
        match_id: Uuid,
        reporter: &SessionId,
        category: ReportCategory,
    ) -> DuetResult<ReportOutcome> {
        self.report_at(match_id, reporter, category, Utc::now()).await
    }

    /// Record a report against a match.
    ///
    /// Once the number of distinct reporters reaches the threshold, both
    /// participants are blacklisted. Reports on unknown matches are ignored.
    pub async fn report_at(
        &self,
        match_id: Uuid,
        reporter: &SessionId,
        category: ReportCategory,
        now: DateTime<Utc>,
    ) -> DuetResult<ReportOutcome> {
        let Some(m) = self.store.get_match(match_id).await? else {
            tracing::debug!(match_id = %match_id, "Report for unknown match ignored");
            return Ok(ReportOutcome {
                recorded: false,
                distinct_reports: 0,
                blacklisted: false,
            });
        };

        self.store
            .insert_report(&Report {
                id: generate_id(),
                match_id,
                reporter: reporter.clone(),
                category,
                created_at: now,
            })
            .await?;
        let distinct_reports = self.store.count_distinct_reporters(match_id).await?;
        tracing::info!(
            match_id = %match_id,
            reporter = %reporter,
            category = %category,
            distinct_reports,
            "Report recorded"
        );

        let blacklisted = distinct_reports >= self.report_threshold;
        if blacklisted {
            let expires_at = self.blacklist.expires_at(now);
            for id in [&m.session_a, &m.session_b] {
                self.store.add_to_blacklist(id, now, expires_at).await?;
            }
            tracing::warn!(
                match_id = %match_id,
                session_a = %m.session_a,
                session_b = %m.session_b,
                expires_at = ?expires_at,
                "Report threshold reached, participants blacklisted"
            );
        }

        Ok(ReportOutcome {
            recorded: true,
            distinct_reports,
            blacklisted,
        })
    }

    /// Drop negotiation logs of matches that ended long enough ago.
    pub async fn prune_ended_signals(&self, now: DateTime<Utc>) -> DuetResult<u64> {
        let pruned = self.store.prune_signals(now - self.retain_after_end).await?;
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned signal logs");
        }
        Ok(pruned)
    }
}
