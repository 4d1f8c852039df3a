//! Presence tracking — who is reachable and what they are doing.
//!
//! A session is live while its last heartbeat is inside the liveness
//! window. Staleness is always judged at read time against the stored
//! heartbeat, so the reaper only tidies status; it never decides liveness.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use duet_common::{
    error::{DuetError, DuetResult},
    ids::generate_session_id,
    models::{Session, SessionId, SessionStatus},
    validation::validate_session_id,
};
use duet_db::SessionStore;

use crate::lifecycle::Lifecycle;

/// Status changes by other requests can interleave with a leave; this
/// bounds how often it re-reads before giving up.
const LEAVE_ATTEMPTS: usize = 4;

#[derive(Clone)]
pub struct Presence {
    store: Arc<dyn SessionStore>,
    liveness_window: Duration,
}

impl Presence {
    pub fn new(store: Arc<dyn SessionStore>, liveness_window: Duration) -> Self {
        Self {
            store,
            liveness_window,
        }
    }

    /// Create the session or refresh its heartbeat.
    ///
    /// A session that is in a call stays in the call; only its heartbeat
    /// moves. Anything else takes `status`.
    pub async fn register_or_refresh(
        &self,
        id: &SessionId,
        status: SessionStatus,
    ) -> DuetResult<Session> {
        validate_session_id(id.as_str())?;
        let session = self.store.upsert_session(id, status, Utc::now()).await?;
        tracing::debug!(
            session = %session.id,
            status = %session.status,
            "Heartbeat recorded"
        );
        Ok(session)
    }

    /// Register a fresh session under a server-generated token.
    pub async fn register_new(&self) -> DuetResult<Session> {
        let id = generate_session_id();
        let session = self
            .store
            .upsert_session(&id, SessionStatus::Waiting, Utc::now())
            .await?;
        tracing::info!(session = %session.id, "Session registered");
        Ok(session)
    }

    pub async fn get(&self, id: &SessionId) -> DuetResult<Option<Session>> {
        Ok(self.store.get_session(id).await?)
    }

    /// Clean exit: end the session's call, if any, then mark it offline.
    ///
    /// Unknown and already-offline sessions are a no-op.
    pub async fn go_offline(&self, id: &SessionId, lifecycle: &Lifecycle) -> DuetResult<()> {
        for _ in 0..LEAVE_ATTEMPTS {
            let Some(session) = self.store.get_session(id).await? else {
                return Ok(());
            };
            let from = match session.status {
                SessionStatus::Offline => return Ok(()),
                SessionStatus::InCall => match session.match_id {
                    // Ending frees us to waiting; the next pass takes us offline.
                    Some(match_id) => {
                        lifecycle.end(match_id).await?;
                        continue;
                    }
                    None => SessionStatus::InCall,
                },
                SessionStatus::Waiting => SessionStatus::Waiting,
            };
            if self
                .store
                .compare_and_set_status(id, from, SessionStatus::Offline, None)
                .await?
            {
                tracing::info!(session = %id, "Session left");
                return Ok(());
            }
        }
        Err(DuetError::Internal(anyhow::anyhow!(
            "session {id} changed state during every leave attempt"
        )))
    }

    /// Heartbeats before this instant are stale at `now`.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.liveness_window
    }

    pub fn is_stale(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.is_stale(now, self.liveness_window)
    }

    /// Unknown and offline sessions are not live.
    pub async fn is_live(&self, id: &SessionId) -> DuetResult<bool> {
        let now = Utc::now();
        Ok(self
            .store
            .get_session(id)
            .await?
            .is_some_and(|s| s.status != SessionStatus::Offline && !self.is_stale(&s, now)))
    }
}
