//! The session store contract.
//!
//! Every method is one short, independently atomic request. Correctness of
//! matching rests on the conditional operations here (`claim_pair`,
//! `compare_and_set_status`, `close_match`, `advance_signal_cursor`); callers
//! never hold a lock across two calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duet_common::models::{Match, Report, Session, SessionId, SessionStatus, SignalMessage};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreResult;

/// Parameters for picking a pairing candidate.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    /// The session looking for a peer; never returned.
    pub requester: SessionId,
    /// Extra ids to skip (lost races this tick, recent partners).
    pub excluded: Vec<SessionId>,
    /// Candidates with an older heartbeat are stale.
    pub fresh_since: DateTime<Utc>,
    /// Evaluation time for blacklist expiry.
    pub now: DateTime<Utc>,
}

/// Result of [`SessionStore::close_match`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// This call stamped the end time.
    Closed(Match),
    /// Someone else already ended it.
    AlreadyEnded(Match),
    Unknown,
}

/// Aggregate counts for the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub waiting: u64,
    pub in_call: u64,
    pub open_matches: u64,
}

/// Durable keyed records for presence, matches, signals and moderation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    // ── Sessions ────────────────────────────────────────────────────────────

    /// Insert the session, or refresh its heartbeat.
    ///
    /// The requested status is applied on insert and to sessions that are not
    /// in a call. An `in_call` session keeps its status and match; only its
    /// heartbeat moves. `in_call` is never written through this path (an
    /// unknown session asking for it is stored as `waiting`).
    async fn upsert_session(
        &self,
        id: &SessionId,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Session>;

    async fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>>;

    /// Move `id` from `expected` to `new`, setting `match_id`. Returns `false`
    /// when the current status is not `expected` (or the session is unknown).
    async fn compare_and_set_status(
        &self,
        id: &SessionId,
        expected: SessionStatus,
        new: SessionStatus,
        match_id: Option<Uuid>,
    ) -> StoreResult<bool>;

    /// Freshest waiting, non-blacklisted session other than the requester.
    async fn find_candidate(&self, query: &CandidateQuery) -> StoreResult<Option<Session>>;

    /// Atomically move `session_a` and `session_b` from `waiting` to `in_call`
    /// and insert the match. `session_b` (the claimed candidate) must also have
    /// a heartbeat at or after `candidate_fresh_since`, and neither side may be
    /// blacklisted at `now`. All or nothing.
    async fn claim_pair(
        &self,
        new_match: &Match,
        candidate_fresh_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Mark `waiting` sessions with a heartbeat before `stale_before` offline.
    async fn mark_stale_offline(&self, stale_before: DateTime<Utc>) -> StoreResult<Vec<SessionId>>;

    // ── Matches ─────────────────────────────────────────────────────────────

    async fn get_match(&self, id: Uuid) -> StoreResult<Option<Match>>;

    /// Stamp end time and duration if unset and release both participants
    /// that are still `in_call` on this match back to `waiting`.
    async fn close_match(&self, id: Uuid, ended_at: DateTime<Utc>) -> StoreResult<CloseOutcome>;

    /// Open matches with at least one participant whose heartbeat is older
    /// than `stale_before`.
    async fn abandoned_matches(&self, stale_before: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    /// Sessions `id` was matched with, in matches started at or after `since`.
    async fn recent_partners(
        &self,
        id: &SessionId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionId>>;

    // ── Signals ─────────────────────────────────────────────────────────────

    /// Append to the match's log. The store assigns `seq` and stamps
    /// `created_at` in the same atomic step: `now`, raised to the log's latest
    /// `created_at` if the clock reads earlier, so timestamps never decrease
    /// along `seq`.
    async fn insert_signal(
        &self,
        match_id: Uuid,
        sender: &SessionId,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> StoreResult<SignalMessage>;

    /// Messages of `match_id` not sent by `exclude_sender` with `seq > after_seq`,
    /// ascending by `seq`.
    async fn signals_after(
        &self,
        match_id: Uuid,
        exclude_sender: &SessionId,
        after_seq: i64,
    ) -> StoreResult<Vec<SignalMessage>>;

    /// Last consumed `seq` for this consumer, 0 if it has consumed nothing.
    async fn signal_cursor(&self, match_id: Uuid, consumer: &SessionId) -> StoreResult<i64>;

    /// Move the consumer's cursor from `expected` to `new`. Returns `false`
    /// if another poll advanced it first.
    async fn advance_signal_cursor(
        &self,
        match_id: Uuid,
        consumer: &SessionId,
        expected: i64,
        new: i64,
    ) -> StoreResult<bool>;

    /// Drop logs and cursors of matches that ended before `ended_before`.
    async fn prune_signals(&self, ended_before: DateTime<Utc>) -> StoreResult<u64>;

    // ── Moderation ──────────────────────────────────────────────────────────

    async fn insert_report(&self, report: &Report) -> StoreResult<()>;

    async fn count_distinct_reporters(&self, match_id: Uuid) -> StoreResult<u64>;

    /// Add or extend an entry. Re-adding keeps the later expiry.
    async fn add_to_blacklist(
        &self,
        id: &SessionId,
        added_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    async fn is_blacklisted(&self, id: &SessionId, now: DateTime<Utc>) -> StoreResult<bool>;

    // ── Ops ─────────────────────────────────────────────────────────────────

    async fn counts(&self) -> StoreResult<StoreCounts>;

    /// Whether the store answers at all.
    async fn ping(&self) -> bool;
}
