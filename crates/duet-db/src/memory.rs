//! In-process session store.
//!
//! All state sits behind one `tokio::sync::Mutex`. Each trait call locks it
//! for a single in-memory operation, which makes every call atomic with
//! respect to every other call, the same guarantee the SQL store gets from
//! conditional updates and transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duet_common::models::{
    BlacklistEntry, Match, Report, Session, SessionId, SessionStatus, SignalMessage,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::store::{CandidateQuery, CloseOutcome, SessionStore, StoreCounts};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<SessionId, Session>,
    matches: HashMap<Uuid, Match>,
    /// match_id → log, each ascending by seq
    signals: HashMap<Uuid, Vec<SignalMessage>>,
    next_seq: i64,
    cursors: HashMap<(Uuid, SessionId), i64>,
    reports: Vec<Report>,
    blacklist: HashMap<SessionId, BlacklistEntry>,
}

impl MemoryState {
    fn is_blacklisted(&self, id: &SessionId, now: DateTime<Utc>) -> bool {
        self.blacklist.get(id).is_some_and(|e| e.is_active(now))
    }

    fn is_waiting(&self, id: &SessionId) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|s| s.status == SessionStatus::Waiting && s.match_id.is_none())
    }
}

/// Session store held entirely in process memory.
///
/// Suitable for a single coordinator instance and for tests; state is lost
/// on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_session(
        &self,
        id: &SessionId,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Session> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .entry(id.clone())
            .and_modify(|s| {
                s.last_heartbeat = now;
                if s.status != SessionStatus::InCall && status != SessionStatus::InCall {
                    s.status = status;
                }
            })
            .or_insert_with(|| {
                let status = match status {
                    SessionStatus::InCall => SessionStatus::Waiting,
                    other => other,
                };
                Session::new(id.clone(), status, now)
            });
        Ok(session.clone())
    }

    async fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        id: &SessionId,
        expected: SessionStatus,
        new: SessionStatus,
        match_id: Option<Uuid>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(id) {
            Some(session) if session.status == expected => {
                session.status = new;
                session.match_id = match_id;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_candidate(&self, query: &CandidateQuery) -> StoreResult<Option<Session>> {
        let state = self.state.lock().await;
        let excluded: HashSet<&SessionId> = query.excluded.iter().collect();

        let candidate = state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Waiting)
            .filter(|s| s.id != query.requester)
            .filter(|s| s.last_heartbeat >= query.fresh_since)
            .filter(|s| !excluded.contains(&s.id))
            .filter(|s| !state.is_blacklisted(&s.id, query.now))
            // Freshest heartbeat first; id breaks ties so the pick is deterministic.
            .max_by(|a, b| {
                a.last_heartbeat
                    .cmp(&b.last_heartbeat)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .cloned();

        Ok(candidate)
    }

    async fn claim_pair(
        &self,
        new_match: &Match,
        candidate_fresh_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;

        let candidate_fresh = state
            .sessions
            .get(&new_match.session_b)
            .is_some_and(|s| s.last_heartbeat >= candidate_fresh_since);
        let eligible = |id: &SessionId| state.is_waiting(id) && !state.is_blacklisted(id, now);

        if !eligible(&new_match.session_a)
            || !eligible(&new_match.session_b)
            || !candidate_fresh
            || state.matches.contains_key(&new_match.id)
        {
            return Ok(false);
        }

        for id in [&new_match.session_a, &new_match.session_b] {
            if let Some(session) = state.sessions.get_mut(id) {
                session.status = SessionStatus::InCall;
                session.match_id = Some(new_match.id);
            }
        }
        state.matches.insert(new_match.id, new_match.clone());
        Ok(true)
    }

    async fn mark_stale_offline(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionId>> {
        let mut state = self.state.lock().await;
        let mut reaped = Vec::new();
        for session in state.sessions.values_mut() {
            if session.status == SessionStatus::Waiting && session.last_heartbeat < stale_before {
                session.status = SessionStatus::Offline;
                reaped.push(session.id.clone());
            }
        }
        Ok(reaped)
    }

    async fn get_match(&self, id: Uuid) -> StoreResult<Option<Match>> {
        Ok(self.state.lock().await.matches.get(&id).cloned())
    }

    async fn close_match(&self, id: Uuid, ended_at: DateTime<Utc>) -> StoreResult<CloseOutcome> {
        let mut state = self.state.lock().await;

        let Some(m) = state.matches.get_mut(&id) else {
            return Ok(CloseOutcome::Unknown);
        };
        if !m.close(ended_at) {
            return Ok(CloseOutcome::AlreadyEnded(m.clone()));
        }
        let closed = m.clone();

        for sid in [&closed.session_a, &closed.session_b] {
            if let Some(session) = state.sessions.get_mut(sid) {
                if session.status == SessionStatus::InCall && session.match_id == Some(id) {
                    session.status = SessionStatus::Waiting;
                    session.match_id = None;
                }
            }
        }

        Ok(CloseOutcome::Closed(closed))
    }

    async fn abandoned_matches(&self, stale_before: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let is_stale = |id: &SessionId| {
            state
                .sessions
                .get(id)
                .is_none_or(|s| s.last_heartbeat < stale_before)
        };

        Ok(state
            .matches
            .values()
            .filter(|m| m.is_open())
            .filter(|m| is_stale(&m.session_a) || is_stale(&m.session_b))
            .map(|m| m.id)
            .collect())
    }

    async fn recent_partners(
        &self,
        id: &SessionId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionId>> {
        let state = self.state.lock().await;
        Ok(state
            .matches
            .values()
            .filter(|m| m.started_at >= since)
            .filter_map(|m| m.peer_of(id).cloned())
            .collect())
    }

    async fn insert_signal(
        &self,
        match_id: Uuid,
        sender: &SessionId,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> StoreResult<SignalMessage> {
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let seq = state.next_seq;

        let log = state.signals.entry(match_id).or_default();
        let created_at = log.last().map_or(now, |last| now.max(last.created_at));
        let message = SignalMessage {
            seq,
            match_id,
            sender: sender.clone(),
            payload: payload.clone(),
            created_at,
        };
        log.push(message.clone());
        Ok(message)
    }

    async fn signals_after(
        &self,
        match_id: Uuid,
        exclude_sender: &SessionId,
        after_seq: i64,
    ) -> StoreResult<Vec<SignalMessage>> {
        let state = self.state.lock().await;
        Ok(state
            .signals
            .get(&match_id)
            .map(|log| {
                log.iter()
                    .filter(|m| m.seq > after_seq && m.sender != *exclude_sender)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn signal_cursor(&self, match_id: Uuid, consumer: &SessionId) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .cursors
            .get(&(match_id, consumer.clone()))
            .copied()
            .unwrap_or(0))
    }

    async fn advance_signal_cursor(
        &self,
        match_id: Uuid,
        consumer: &SessionId,
        expected: i64,
        new: i64,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let cursor = state.cursors.entry((match_id, consumer.clone())).or_insert(0);
        if *cursor != expected {
            return Ok(false);
        }
        *cursor = new;
        Ok(true)
    }

    async fn prune_signals(&self, ended_before: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let expired: HashSet<Uuid> = state
            .matches
            .values()
            .filter(|m| m.ended_at.is_some_and(|t| t < ended_before))
            .map(|m| m.id)
            .collect();

        let mut removed = 0u64;
        for id in &expired {
            if let Some(log) = state.signals.remove(id) {
                removed += log.len() as u64;
            }
        }
        state.cursors.retain(|(match_id, _), _| !expired.contains(match_id));
        Ok(removed)
    }

    async fn insert_report(&self, report: &Report) -> StoreResult<()> {
        self.state.lock().await.reports.push(report.clone());
        Ok(())
    }

    async fn count_distinct_reporters(&self, match_id: Uuid) -> StoreResult<u64> {
        let state = self.state.lock().await;
        let reporters: HashSet<&SessionId> = state
            .reports
            .iter()
            .filter(|r| r.match_id == match_id)
            .map(|r| &r.reporter)
            .collect();
        Ok(reporters.len() as u64)
    }

    async fn add_to_blacklist(
        &self,
        id: &SessionId,
        added_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .blacklist
            .entry(id.clone())
            .and_modify(|e| e.expires_at = later_expiry(e.expires_at, expires_at))
            .or_insert_with(|| BlacklistEntry {
                session_id: id.clone(),
                added_at,
                expires_at,
            });
        Ok(())
    }

    async fn is_blacklisted(&self, id: &SessionId, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self.state.lock().await.is_blacklisted(id, now))
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        let state = self.state.lock().await;
        let count_status = |status| {
            state
                .sessions
                .values()
                .filter(|s| s.status == status)
                .count() as u64
        };
        Ok(StoreCounts {
            waiting: count_status(SessionStatus::Waiting),
            in_call: count_status(SessionStatus::InCall),
            open_matches: state.matches.values().filter(|m| m.is_open()).count() as u64,
        })
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// `None` is "never expires" and beats any timestamp.
pub(crate) fn later_expiry(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        _ => None,
    }
}
