//! Reaper — background sweep that tidies stale presence.
//!
//! Liveness is judged at read time, so the matcher behaves the same with
//! the reaper on or off. The sweep only keeps stored status honest:
//!
//! 1. Open matches with a silent participant are ended.
//! 2. Waiting sessions with a stale heartbeat are marked offline.
//! 3. Negotiation logs of long-ended matches are dropped.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use duet_common::error::DuetResult;
use duet_db::SessionStore;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use crate::lifecycle::{EndOutcome, Lifecycle};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub ended_matches: usize,
    pub offlined_sessions: usize,
    pub pruned_signals: u64,
}

#[derive(Clone)]
pub struct Reaper {
    store: Arc<dyn SessionStore>,
    lifecycle: Lifecycle,
    liveness_window: Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn SessionStore>, lifecycle: Lifecycle, liveness_window: Duration) -> Self {
        Self {
            store,
            lifecycle,
            liveness_window,
        }
    }

    /// One pass over the store, judged at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> DuetResult<SweepReport> {
        let stale_before = now - self.liveness_window;
        let mut report = SweepReport::default();

        // Ending first releases the silent side to waiting, so the next step
        // takes it offline in the same pass.
        for match_id in self.store.abandoned_matches(stale_before).await? {
            if let EndOutcome::Ended(m) = self.lifecycle.end_at(match_id, now).await? {
                tracing::info!(match_id = %m.id, "Ended abandoned call");
                report.ended_matches += 1;
            }
        }

        let offlined = self.store.mark_stale_offline(stale_before).await?;
        for id in &offlined {
            tracing::debug!(session = %id, "Session went offline");
        }
        report.offlined_sessions = offlined.len();

        report.pruned_signals = self.lifecycle.prune_ended_signals(now).await?;
        Ok(report)
    }

    /// Run [`Reaper::sweep`] every `every` until `shutdown` flips to `true`
    /// or its sender is dropped.
    pub fn spawn(self, every: std::time::Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = every.as_secs(), "Reaper started");
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep(Utc::now()).await {
                            Ok(report) if report != SweepReport::default() => {
                                tracing::debug!(?report, "Reaper sweep");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "Reaper sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Reaper stopped");
        })
    }
}
