//! Matcher — pairs a waiting session with another live waiting session.
//!
//! No lock is held between reading a candidate and claiming it. The claim
//! is a single conditional write in the store that succeeds only if both
//! sides are still waiting (and the candidate still fresh), so two sessions
//! seeking at the same moment can never both win, and never end up in two
//! matches.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use duet_common::{
    error::DuetResult,
    ids::generate_id,
    models::{Match, SessionId, SessionStatus},
};
use duet_db::{CandidateQuery, SessionStore};
use serde::Serialize;
use uuid::Uuid;

use crate::settings::Settings;
use crate::signaling::{Role, role_for};

/// A match as seen by one of its participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub match_id: Uuid,
    pub peer: SessionId,
    pub role: Role,
    pub started_at: DateTime<Utc>,
}

impl MatchResult {
    /// `None` if `me` is not a participant.
    pub fn for_participant(m: &Match, me: &SessionId) -> Option<Self> {
        let peer = m.peer_of(me)?;
        Some(Self {
            match_id: m.id,
            peer: peer.clone(),
            role: role_for(me, peer),
            started_at: m.started_at,
        })
    }
}

#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn SessionStore>,
    liveness_window: Duration,
    max_claim_attempts: u32,
    repeat_partner_window: Option<Duration>,
}

impl Matcher {
    pub fn new(store: Arc<dyn SessionStore>, settings: &Settings) -> Self {
        Self {
            store,
            liveness_window: settings.liveness_window,
            max_claim_attempts: settings.max_claim_attempts.max(1),
            repeat_partner_window: settings.repeat_partner_window,
        }
    }

    /// The requester's open match, if it is in one.
    pub async fn current_match(&self, requester: &SessionId) -> DuetResult<Option<MatchResult>> {
        let Some(session) = self.store.get_session(requester).await? else {
            return Ok(None);
        };
        let Some(match_id) = session.match_id.filter(|_| session.status == SessionStatus::InCall)
        else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_match(match_id)
            .await?
            .filter(Match::is_open)
            .and_then(|m| MatchResult::for_participant(&m, requester)))
    }

    /// Find a peer for `requester` and claim the pair.
    ///
    /// Returns the existing match if the requester is already in one (the
    /// peer may have claimed it first). Returns `None` when the requester is
    /// unknown, offline or blacklisted, when nobody live is waiting, or when
    /// every claim attempt lost a race; the caller simply polls again.
    pub async fn find_peer_and_match(
        &self,
        requester: &SessionId,
    ) -> DuetResult<Option<MatchResult>> {
        let Some(session) = self.store.get_session(requester).await? else {
            tracing::debug!(session = %requester, "Match requested by unknown session");
            return Ok(None);
        };
        match session.status {
            SessionStatus::InCall => return self.current_match(requester).await,
            SessionStatus::Offline => return Ok(None),
            SessionStatus::Waiting => {}
        }

        let now = Utc::now();
        if self.store.is_blacklisted(requester, now).await? {
            tracing::debug!(session = %requester, "Blacklisted session asked for a match");
            return Ok(None);
        }

        let fresh_since = now - self.liveness_window;
        let mut excluded = match self.repeat_partner_window {
            Some(window) => self.store.recent_partners(requester, now - window).await?,
            None => Vec::new(),
        };

        for attempt in 1..=self.max_claim_attempts {
            let query = CandidateQuery {
                requester: requester.clone(),
                excluded: excluded.clone(),
                fresh_since,
                now,
            };
            let Some(candidate) = self.store.find_candidate(&query).await? else {
                return Ok(None);
            };

            let claimed_at = Utc::now();
            let new_match =
                Match::open(generate_id(), requester.clone(), candidate.id.clone(), claimed_at)?;
            if self.store.claim_pair(&new_match, fresh_since, claimed_at).await? {
                tracing::info!(
                    match_id = %new_match.id,
                    requester = %requester,
                    peer = %candidate.id,
                    attempt,
                    "Match created"
                );
                return Ok(MatchResult::for_participant(&new_match, requester));
            }

            // Either the candidate went away, or someone claimed us.
            if let Some(existing) = self.current_match(requester).await? {
                tracing::debug!(
                    match_id = %existing.match_id,
                    session = %requester,
                    "Claimed by peer during seek"
                );
                return Ok(Some(existing));
            }
            tracing::debug!(
                requester = %requester,
                candidate = %candidate.id,
                attempt,
                "Lost claim race"
            );
            excluded.push(candidate.id);
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use duet_common::config::DatabaseConfig;
    use duet_common::models::{Report, Session, SignalMessage};
    use duet_db::{CloseOutcome, Database, MemoryStore, SqlStore, StoreCounts, StoreResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Memory store that can lose claims on demand, or blacklist whoever
    /// it hands out as a candidate.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryStore,
        lose_claims: AtomicU32,
        claims: AtomicU32,
        blacklist_on_select: bool,
    }

    #[async_trait]
    impl SessionStore for ScriptedStore {
        async fn upsert_session(
            &self,
            id: &SessionId,
            status: SessionStatus,
            now: DateTime<Utc>,
        ) -> StoreResult<Session> {
            self.inner.upsert_session(id, status, now).await
        }

        async fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
            self.inner.get_session(id).await
        }

        async fn compare_and_set_status(
            &self,
            id: &SessionId,
            expected: SessionStatus,
            new: SessionStatus,
            match_id: Option<Uuid>,
        ) -> StoreResult<bool> {
            self.inner.compare_and_set_status(id, expected, new, match_id).await
        }

        async fn find_candidate(&self, query: &CandidateQuery) -> StoreResult<Option<Session>> {
            let candidate = self.inner.find_candidate(query).await?;
            if let Some(c) = candidate.as_ref().filter(|_| self.blacklist_on_select) {
                self.inner.add_to_blacklist(&c.id, query.now, None).await?;
            }
            Ok(candidate)
        }

        async fn claim_pair(
            &self,
            new_match: &Match,
            candidate_fresh_since: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> StoreResult<bool> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            let lose = self
                .lose_claims
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lose {
                return Ok(false);
            }
            self.inner.claim_pair(new_match, candidate_fresh_since, now).await
        }

        async fn mark_stale_offline(
            &self,
            stale_before: DateTime<Utc>,
        ) -> StoreResult<Vec<SessionId>> {
            self.inner.mark_stale_offline(stale_before).await
        }

        async fn get_match(&self, id: Uuid) -> StoreResult<Option<Match>> {
            self.inner.get_match(id).await
        }

        async fn close_match(
            &self,
            id: Uuid,
            ended_at: DateTime<Utc>,
        ) -> StoreResult<CloseOutcome> {
            self.inner.close_match(id, ended_at).await
        }

        async fn abandoned_matches(&self, stale_before: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
            self.inner.abandoned_matches(stale_before).await
        }

        async fn recent_partners(
            &self,
            id: &SessionId,
            since: DateTime<Utc>,
        ) -> StoreResult<Vec<SessionId>> {
            self.inner.recent_partners(id, since).await
        }

        async fn insert_signal(
            &self,
            match_id: Uuid,
            sender: &SessionId,
            payload: &serde_json::Value,
            now: DateTime<Utc>,
        ) -> StoreResult<SignalMessage> {
            self.inner.insert_signal(match_id, sender, payload, now).await
        }

        async fn signals_after(
            &self,
            match_id: Uuid,
            exclude_sender: &SessionId,
            after_seq: i64,
        ) -> StoreResult<Vec<SignalMessage>> {
            self.inner.signals_after(match_id, exclude_sender, after_seq).await
        }

        async fn signal_cursor(&self, match_id: Uuid, consumer: &SessionId) -> StoreResult<i64> {
            self.inner.signal_cursor(match_id, consumer).await
        }

        async fn advance_signal_cursor(
            &self,
            match_id: Uuid,
            consumer: &SessionId,
            expected: i64,
            new: i64,
        ) -> StoreResult<bool> {
            self.inner.advance_signal_cursor(match_id, consumer, expected, new).await
        }

        async fn prune_signals(&self, ended_before: DateTime<Utc>) -> StoreResult<u64> {
            self.inner.prune_signals(ended_before).await
        }

        async fn insert_report(&self, report: &Report) -> StoreResult<()> {
            self.inner.insert_report(report).await
        }

        async fn count_distinct_reporters(&self, match_id: Uuid) -> StoreResult<u64> {
            self.inner.count_distinct_reporters(match_id).await
        }

        async fn add_to_blacklist(
            &self,
            id: &SessionId,
            added_at: DateTime<Utc>,
            expires_at: Option<DateTime<Utc>>,
        ) -> StoreResult<()> {
            self.inner.add_to_blacklist(id, added_at, expires_at).await
        }

        async fn is_blacklisted(&self, id: &SessionId, now: DateTime<Utc>) -> StoreResult<bool> {
            self.inner.is_blacklisted(id, now).await
        }

        async fn counts(&self) -> StoreResult<StoreCounts> {
            self.inner.counts().await
        }

        async fn ping(&self) -> bool {
            self.inner.ping().await
        }
    }

    fn scripted(store: ScriptedStore, settings: Settings) -> (Arc<ScriptedStore>, Matcher) {
        let store = Arc::new(store);
        let matcher = Matcher::new(store.clone(), &settings);
        (store, matcher)
    }

    fn setup(settings: Settings) -> (Arc<dyn SessionStore>, Matcher) {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let matcher = Matcher::new(store.clone(), &settings);
        (store, matcher)
    }

    async fn wait(store: &Arc<dyn SessionStore>, id: &str, at: DateTime<Utc>) {
        store.upsert_session(&id.into(), SessionStatus::Waiting, at).await.unwrap();
    }

    #[tokio::test]
    async fn pairs_two_waiting_sessions() {
        let (store, matcher) = setup(Settings::default());
        let now = Utc::now();
        wait(&store, "s1", now).await;
        wait(&store, "s2", now).await;

        let result = matcher.find_peer_and_match(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(result.peer, SessionId::from("s2"));
        assert_eq!(result.role, Role::Offer);

        // s2 discovers the same match instead of starting a new search.
        let seen = matcher.find_peer_and_match(&"s2".into()).await.unwrap().unwrap();
        assert_eq!(seen.match_id, result.match_id);
        assert_eq!(seen.peer, SessionId::from("s1"));
        assert_eq!(seen.role, Role::Answer);

        let s2 = store.get_session(&"s2".into()).await.unwrap().unwrap();
        assert_eq!(s2.status, SessionStatus::InCall);
        assert_eq!(s2.match_id, Some(result.match_id));
    }

    #[tokio::test]
    async fn alone_or_unknown_gets_nothing() {
        let (store, matcher) = setup(Settings::default());
        wait(&store, "s1", Utc::now()).await;
        assert!(matcher.find_peer_and_match(&"s1".into()).await.unwrap().is_none());
        assert!(matcher.find_peer_and_match(&"ghost".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skips_stale_candidates() {
        let (store, matcher) = setup(Settings::default());
        let now = Utc::now();
        wait(&store, "s1", now).await;
        wait(&store, "old", now - Duration::seconds(30)).await;

        assert!(matcher.find_peer_and_match(&"s1".into()).await.unwrap().is_none());
        let old = store.get_session(&"old".into()).await.unwrap().unwrap();
        assert_eq!(old.status, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn blacklisted_sessions_are_neither_matched_nor_offered() {
        let (store, matcher) = setup(Settings::default());
        let now = Utc::now();
        wait(&store, "s1", now).await;
        wait(&store, "s2", now).await;
        wait(&store, "s3", now).await;
        store.add_to_blacklist(&"s1".into(), now, None).await.unwrap();
        store.add_to_blacklist(&"s2".into(), now, None).await.unwrap();

        assert!(matcher.find_peer_and_match(&"s3".into()).await.unwrap().is_none());
        assert!(matcher.find_peer_and_match(&"s1".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn avoids_recent_partners_when_configured() {
        let (store, matcher) = setup(Settings {
            repeat_partner_window: Some(Duration::minutes(5)),
            ..Settings::default()
        });
        let now = Utc::now();
        wait(&store, "s1", now).await;
        wait(&store, "s2", now).await;

        let first = matcher.find_peer_and_match(&"s1".into()).await.unwrap().unwrap();
        store.close_match(first.match_id, Utc::now()).await.unwrap();

        assert!(matcher.find_peer_and_match(&"s1".into()).await.unwrap().is_none());

        wait(&store, "s3", Utc::now()).await;
        let second = matcher.find_peer_and_match(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(second.peer, SessionId::from("s3"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_seekers_form_one_match() {
        for _ in 0..50 {
            let (store, matcher) = setup(Settings::default());
            let now = Utc::now();
            wait(&store, "s1", now).await;
            wait(&store, "s2", now).await;

            let (m1, m2) = (matcher.clone(), matcher.clone());
            let a = tokio::spawn(async move { m1.find_peer_and_match(&"s1".into()).await });
            let b = tokio::spawn(async move { m2.find_peer_and_match(&"s2".into()).await });
            let (ra, rb) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

            let s1 = store.get_session(&"s1".into()).await.unwrap().unwrap();
            let s2 = store.get_session(&"s2".into()).await.unwrap().unwrap();
            assert_eq!(s1.status, SessionStatus::InCall);
            assert_eq!(s2.status, SessionStatus::InCall);
            assert_eq!(s1.match_id, s2.match_id);

            // Whoever got a result got the shared match.
            for result in [ra, rb].into_iter().flatten() {
                assert_eq!(Some(result.match_id), s1.match_id);
            }
            assert_eq!(store.counts().await.unwrap().open_matches, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn three_seekers_never_double_book() {
        for _ in 0..30 {
            let (store, matcher) = setup(Settings::default());
            let now = Utc::now();
            for id in ["a", "b", "c"] {
                wait(&store, id, now).await;
            }

            let handles: Vec<_> = ["a", "b", "c"]
                .into_iter()
                .map(|id| {
                    let m = matcher.clone();
                    tokio::spawn(async move { m.find_peer_and_match(&id.into()).await })
                })
                .collect();
            for handle in futures_util::future::join_all(handles).await {
                handle.unwrap().unwrap();
            }

            let counts = store.counts().await.unwrap();
            assert_eq!(counts.open_matches, 1);
            assert_eq!(counts.in_call, 2);
            assert_eq!(counts.waiting, 1);
        }
    }

    #[tokio::test]
    async fn lost_claim_moves_on_to_next_candidate() {
        let (store, matcher) = scripted(
            ScriptedStore {
                lose_claims: AtomicU32::new(1),
                ..ScriptedStore::default()
            },
            Settings::default(),
        );
        let now = Utc::now();
        for (id, at) in [("me", now), ("first", now), ("second", now - Duration::seconds(1))] {
            store.upsert_session(&id.into(), SessionStatus::Waiting, at).await.unwrap();
        }

        let result = matcher.find_peer_and_match(&"me".into()).await.unwrap().unwrap();
        assert_eq!(result.peer, SessionId::from("second"));
        assert_eq!(store.claims.load(Ordering::SeqCst), 2);

        let first = store.get_session(&"first".into()).await.unwrap().unwrap();
        assert_eq!(first.status, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn gives_up_after_max_claim_attempts() {
        let (store, matcher) = scripted(
            ScriptedStore {
                lose_claims: AtomicU32::new(u32::MAX),
                ..ScriptedStore::default()
            },
            Settings {
                max_claim_attempts: 3,
                ..Settings::default()
            },
        );
        let now = Utc::now();
        for id in ["me", "p1", "p2", "p3", "p4", "p5"] {
            store.upsert_session(&id.into(), SessionStatus::Waiting, now).await.unwrap();
        }

        assert!(matcher.find_peer_and_match(&"me".into()).await.unwrap().is_none());
        assert_eq!(store.claims.load(Ordering::SeqCst), 3);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.open_matches, 0);
        assert_eq!(counts.waiting, 6);
    }

    #[tokio::test]
    async fn candidate_blacklisted_mid_seek_is_not_paired() {
        let (store, matcher) = scripted(
            ScriptedStore {
                blacklist_on_select: true,
                ..ScriptedStore::default()
            },
            Settings::default(),
        );
        let now = Utc::now();
        for id in ["me", "p1", "p2"] {
            store.upsert_session(&id.into(), SessionStatus::Waiting, now).await.unwrap();
        }

        assert!(matcher.find_peer_and_match(&"me".into()).await.unwrap().is_none());
        assert_eq!(store.claims.load(Ordering::SeqCst), 2);
        assert_eq!(store.counts().await.unwrap().open_matches, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mutual_seekers_on_sql_store_never_double_book() {
        let ids = ["a", "b", "c", "d"];
        for _ in 0..10 {
            let db = Database::connect(&DatabaseConfig {
                url: "sqlite::memory:".into(),
                max_connections: 1,
                min_connections: 1,
            })
            .await
            .unwrap();
            db.migrate().await.unwrap();
            let store: Arc<dyn SessionStore> = Arc::new(SqlStore::new(db.pool));
            let matcher = Matcher::new(store.clone(), &Settings::default());

            let now = Utc::now();
            for id in ids {
                wait(&store, id, now).await;
            }

            let handles: Vec<_> = ids
                .into_iter()
                .map(|id| {
                    let m = matcher.clone();
                    tokio::spawn(async move { m.find_peer_and_match(&id.into()).await })
                })
                .collect();
            for handle in futures_util::future::join_all(handles).await {
                handle.unwrap().unwrap();
            }

            let counts = store.counts().await.unwrap();
            assert!(counts.open_matches >= 1);
            assert_eq!(counts.in_call, counts.open_matches * 2);
            assert_eq!(counts.in_call + counts.waiting, 4);

            for id in ids {
                let session = store.get_session(&id.into()).await.unwrap().unwrap();
                let Some(match_id) = session.match_id else {
                    assert_eq!(session.status, SessionStatus::Waiting);
                    continue;
                };
                let m = store.get_match(match_id).await.unwrap().unwrap();
                let peer = m.peer_of(&session.id).unwrap();
                let peer = store.get_session(peer).await.unwrap().unwrap();
                assert_eq!(peer.status, SessionStatus::InCall);
                assert_eq!(peer.match_id, Some(match_id));
            }
        }
    }
}
