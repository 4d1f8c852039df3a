//! SQL session store over `sqlx::AnyPool`.
//!
//! Conditional transitions are `UPDATE ... WHERE status = ?` checked through
//! `rows_affected()`. The two multi-row units, claiming a pair and closing a
//! match, run inside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duet_common::models::{Match, Report, Session, SessionId, SessionStatus, SignalMessage};
use sqlx::AnyPool;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::repository::{matches, moderation, sessions, signals};
use crate::store::{CandidateQuery, CloseOutcome, SessionStore, StoreCounts};

/// Session store backed by a relational database.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqlStore {
    async fn upsert_session(
        &self,
        id: &SessionId,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Session> {
        Ok(sessions::upsert(&self.pool, id, status, now).await?)
    }

    async fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        Ok(sessions::find_by_id(&self.pool, id).await?)
    }

    async fn compare_and_set_status(
        &self,
        id: &SessionId,
        expected: SessionStatus,
        new: SessionStatus,
        match_id: Option<Uuid>,
    ) -> StoreResult<bool> {
        Ok(sessions::compare_and_set(&self.pool, id, expected, new, match_id).await?)
    }

    async fn find_candidate(&self, query: &CandidateQuery) -> StoreResult<Option<Session>> {
        Ok(sessions::find_candidate(&self.pool, query).await?)
    }

    async fn claim_pair(
        &self,
        new_match: &Match,
        candidate_fresh_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Canonical order: two requesters claiming each other lock rows in the
        // same sequence, so neither waits on the other.
        let mut sides = [
            (&new_match.session_a, None),
            (&new_match.session_b, Some(candidate_fresh_since)),
        ];
        sides.sort_by(|x, y| x.0.cmp(y.0));

        for (id, fresh_since) in sides {
            if !sessions::claim(&mut *tx, id, new_match.id, fresh_since, now).await? {
                tx.rollback().await?;
                return Ok(false);
            }
        }

        matches::insert(&mut *tx, new_match).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn mark_stale_offline(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionId>> {
        Ok(sessions::mark_stale_offline(&self.pool, stale_before).await?)
    }

    async fn get_match(&self, id: Uuid) -> StoreResult<Option<Match>> {
        Ok(matches::find_by_id(&self.pool, id).await?)
    }

    async fn close_match(&self, id: Uuid, ended_at: DateTime<Utc>) -> StoreResult<CloseOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(mut m) = matches::find_by_id(&mut *tx, id).await? else {
            tx.rollback().await?;
            return Ok(CloseOutcome::Unknown);
        };

        if !m.close(ended_at) {
            tx.rollback().await?;
            return Ok(CloseOutcome::AlreadyEnded(m));
        }

        let (Some(end), Some(duration)) = (m.ended_at, m.duration_secs) else {
            tx.rollback().await?;
            return Ok(CloseOutcome::AlreadyEnded(m));
        };

        if !matches::stamp_end(&mut *tx, id, end, duration).await? {
            // Lost to a concurrent close; report what that one stamped.
            tx.rollback().await?;
            return Ok(match matches::find_by_id(&self.pool, id).await? {
                Some(ended) => CloseOutcome::AlreadyEnded(ended),
                None => CloseOutcome::Unknown,
            });
        }

        sessions::release_match(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(CloseOutcome::Closed(m))
    }

    async fn abandoned_matches(&self, stale_before: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        Ok(matches::find_abandoned(&self.pool, stale_before).await?)
    }

    async fn recent_partners(
        &self,
        id: &SessionId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionId>> {
        Ok(matches::partners_since(&self.pool, id, since).await?)
    }

    async fn insert_signal(
        &self,
        match_id: Uuid,
        sender: &SessionId,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> StoreResult<SignalMessage> {
        Ok(signals::insert(&self.pool, match_id, sender, payload, now).await?)
    }

    async fn signals_after(
        &self,
        match_id: Uuid,
        exclude_sender: &SessionId,
        after_seq: i64,
    ) -> StoreResult<Vec<SignalMessage>> {
        Ok(signals::list_after(&self.pool, match_id, exclude_sender, after_seq).await?)
    }

    async fn signal_cursor(&self, match_id: Uuid, consumer: &SessionId) -> StoreResult<i64> {
        Ok(signals::get_cursor(&self.pool, match_id, consumer).await?)
    }

    async fn advance_signal_cursor(
        &self,
        match_id: Uuid,
        consumer: &SessionId,
        expected: i64,
        new: i64,
    ) -> StoreResult<bool> {
        Ok(signals::advance_cursor(&self.pool, match_id, consumer, expected, new).await?)
    }

    async fn prune_signals(&self, ended_before: DateTime<Utc>) -> StoreResult<u64> {
        Ok(signals::prune_ended(&self.pool, ended_before).await?)
    }

    async fn insert_report(&self, report: &Report) -> StoreResult<()> {
        Ok(moderation::insert_report(&self.pool, report).await?)
    }

    async fn count_distinct_reporters(&self, match_id: Uuid) -> StoreResult<u64> {
        Ok(moderation::count_distinct_reporters(&self.pool, match_id).await?)
    }

    async fn add_to_blacklist(
        &self,
        id: &SessionId,
        added_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        Ok(moderation::add_to_blacklist(&self.pool, id, added_at, expires_at).await?)
    }

    async fn is_blacklisted(&self, id: &SessionId, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(moderation::is_blacklisted(&self.pool, id, now).await?)
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        let mut counts = StoreCounts::default();
        for (status, n) in sessions::count_by_status(&self.pool).await? {
            match status {
                SessionStatus::Waiting => counts.waiting = n,
                SessionStatus::InCall => counts.in_call = n,
                SessionStatus::Offline => {}
            }
        }
        counts.open_matches = matches::count_open(&self.pool).await?;
        Ok(counts)
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
