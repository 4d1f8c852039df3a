//! The client-facing operations, composed from the components.

use std::sync::Arc;

use duet_common::{
    error::DuetResult,
    models::{ReportCategory, Session, SessionId, SessionStatus},
};
use duet_db::{SessionStore, StoreCounts};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    lifecycle::{EndOutcome, Lifecycle, ReportOutcome},
    matcher::{MatchResult, Matcher},
    presence::Presence,
    reaper::Reaper,
    relay::{SignalEnvelope, SignalRelay},
    settings::Settings,
};

/// Shared handle over one session store. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn SessionStore>,
    settings: Settings,
    presence: Presence,
    matcher: Matcher,
    relay: SignalRelay,
    lifecycle: Lifecycle,
}

impl Coordinator {
    pub fn new(store: Arc<dyn SessionStore>, settings: Settings) -> Self {
        Self {
            presence: Presence::new(store.clone(), settings.liveness_window),
            matcher: Matcher::new(store.clone(), &settings),
            relay: SignalRelay::new(store.clone(), settings.max_payload_bytes),
            lifecycle: Lifecycle::new(store.clone(), &settings),
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn relay(&self) -> &SignalRelay {
        &self.relay
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// A reaper over the same store, ready to [`Reaper::spawn`].
    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            self.store.clone(),
            self.lifecycle.clone(),
            self.settings.liveness_window,
        )
    }

    /// Enter the pool of waiting sessions, under `id` or a fresh token.
    pub async fn start_waiting(&self, id: Option<SessionId>) -> DuetResult<Session> {
        match id {
            Some(id) => self.presence.register_or_refresh(&id, SessionStatus::Waiting).await,
            None => self.presence.register_new().await,
        }
    }

    /// Keep the session live. A session in a call stays in the call.
    pub async fn heartbeat(&self, id: &SessionId) -> DuetResult<Session> {
        self.presence.register_or_refresh(id, SessionStatus::Waiting).await
    }

    /// The caller's current match, or a new one if a live peer is waiting.
    ///
    /// A call whose peer has stopped heartbeating is ended here rather than
    /// handed back, whether or not the reaper is running.
    pub async fn poll_for_match(&self, id: &SessionId) -> DuetResult<Option<MatchResult>> {
        if let Some(current) = self.matcher.current_match(id).await? {
            if self.presence.is_live(&current.peer).await? {
                return Ok(Some(current));
            }
            tracing::info!(
                match_id = %current.match_id,
                session = %id,
                peer = %current.peer,
                "Peer went silent, ending call"
            );
            self.lifecycle.end(current.match_id).await?;
        }
        self.matcher.find_peer_and_match(id).await
    }

    pub async fn send_negotiation_message(
        &self,
        match_id: Uuid,
        sender: &SessionId,
        payload: Value,
    ) -> DuetResult<SignalEnvelope> {
        self.relay.send(match_id, sender, payload).await
    }

    pub async fn poll_negotiation_messages(
        &self,
        match_id: Uuid,
        me: &SessionId,
    ) -> DuetResult<Vec<SignalEnvelope>> {
        self.relay.receive_new(match_id, me).await
    }

    pub async fn end_call(&self, match_id: Uuid) -> DuetResult<EndOutcome> {
        self.lifecycle.end(match_id).await
    }

    pub async fn report_match(
        &self,
        match_id: Uuid,
        reporter: &SessionId,
        category: ReportCategory,
    ) -> DuetResult<ReportOutcome> {
        self.lifecycle.report(match_id, reporter, category).await
    }

    pub async fn leave(&self, id: &SessionId) -> DuetResult<()> {
        self.presence.go_offline(id, &self.lifecycle).await
    }

    pub async fn stats(&self) -> DuetResult<StoreCounts> {
        Ok(self.store.counts().await?)
    }

    pub async fn ping(&self) -> bool {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{InboxAction, NegotiationInbox, Role};
    use chrono::{Duration, Utc};
    use duet_common::config::DatabaseConfig;
    use duet_db::{Database, MemoryStore, SqlStore};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory() -> Coordinator {
        Coordinator::new(Arc::new(MemoryStore::new()), Settings::default())
    }

    async fn sqlite() -> Coordinator {
        let db = Database::connect(&DatabaseConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
        })
        .await
        .unwrap();
        db.migrate().await.unwrap();
        Coordinator::new(Arc::new(SqlStore::new(db.pool)), Settings::default())
    }

    async fn paired(c: &Coordinator) -> MatchResult {
        c.start_waiting(Some("s1".into())).await.unwrap();
        c.start_waiting(Some("s2".into())).await.unwrap();
        c.poll_for_match(&"s1".into()).await.unwrap().unwrap()
    }

    async fn full_call(c: Coordinator) {
        let (s1, s2) = (SessionId::from("s1"), SessionId::from("s2"));
        let m = paired(&c).await;
        assert_eq!(m.peer, s2);
        assert_eq!(m.role, Role::Offer);

        let seen = c.poll_for_match(&s2).await.unwrap().unwrap();
        assert_eq!(seen.match_id, m.match_id);
        assert_eq!(seen.role, Role::Answer);

        // The answerer may see candidates before the offer.
        c.send_negotiation_message(m.match_id, &s1, json!({"type": "candidate", "candidate": "c1"}))
            .await
            .unwrap();
        c.send_negotiation_message(m.match_id, &s1, json!({"type": "offer", "sdp": "o"}))
            .await
            .unwrap();

        let mut inbox = NegotiationInbox::new(seen.role);
        let first = c.poll_negotiation_messages(m.match_id, &s2).await.unwrap();
        assert_eq!(first.len(), 2);
        let actions = inbox.accept(first);
        assert!(matches!(actions[0], InboxAction::ApplyRemoteDescription(_)));
        assert!(matches!(actions[1], InboxAction::AddCandidate(_)));

        c.send_negotiation_message(m.match_id, &s2, json!({"type": "answer", "sdp": "a"}))
            .await
            .unwrap();
        let answers = c.poll_negotiation_messages(m.match_id, &s1).await.unwrap();
        assert_eq!(answers.len(), 1);

        let outcome = c.end_call(m.match_id).await.unwrap();
        assert!(matches!(outcome, EndOutcome::Ended(_)));
        assert!(matches!(
            c.end_call(m.match_id).await.unwrap(),
            EndOutcome::AlreadyEnded(_)
        ));

        for id in [&s1, &s2] {
            let s = c.presence().get(id).await.unwrap().unwrap();
            assert_eq!(s.status, SessionStatus::Waiting);
            assert_eq!(s.match_id, None);
        }
        assert_eq!(c.stats().await.unwrap().open_matches, 0);
    }

    #[tokio::test]
    async fn full_call_in_memory() {
        full_call(memory()).await;
    }

    #[tokio::test]
    async fn full_call_on_sqlite() {
        full_call(sqlite().await).await;
    }

    #[tokio::test]
    async fn end_at_records_whole_seconds() {
        let c = memory();
        let m = paired(&c).await;
        let outcome = c
            .lifecycle()
            .end_at(m.match_id, m.started_at + Duration::seconds(42))
            .await
            .unwrap();
        assert_eq!(outcome.call().unwrap().duration_secs, Some(42));
    }

    async fn reported_pair_is_shunned(c: Coordinator) {
        let m = paired(&c).await;
        for reporter in ["r1", "r2", "r3"] {
            c.report_match(m.match_id, &reporter.into(), ReportCategory::Harassment)
                .await
                .unwrap();
        }
        c.end_call(m.match_id).await.unwrap();

        c.start_waiting(Some("s3".into())).await.unwrap();
        for _ in 0..5 {
            assert!(c.poll_for_match(&"s3".into()).await.unwrap().is_none());
        }
        assert!(c.poll_for_match(&"s1".into()).await.unwrap().is_none());

        c.start_waiting(Some("s4".into())).await.unwrap();
        let fresh = c.poll_for_match(&"s3".into()).await.unwrap().unwrap();
        assert_eq!(fresh.peer, SessionId::from("s4"));
    }

    #[tokio::test]
    async fn reported_pair_is_shunned_in_memory() {
        reported_pair_is_shunned(memory()).await;
    }

    #[tokio::test]
    async fn reported_pair_is_shunned_on_sqlite() {
        reported_pair_is_shunned(sqlite().await).await;
    }

    #[tokio::test]
    async fn silent_peer_is_dropped_on_poll() {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let c = Coordinator::new(store.clone(), Settings::default());
        let past = Utc::now() - Duration::seconds(30);
        store.upsert_session(&"s1".into(), SessionStatus::Waiting, past).await.unwrap();
        store.upsert_session(&"s2".into(), SessionStatus::Waiting, past).await.unwrap();
        let m = duet_common::models::Match::open(Uuid::now_v7(), "s1".into(), "s2".into(), past)
            .unwrap();
        assert!(store.claim_pair(&m, past, past).await.unwrap());

        c.heartbeat(&"s1".into()).await.unwrap();
        assert!(c.poll_for_match(&"s1".into()).await.unwrap().is_none());
        assert!(!store.get_match(m.id).await.unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn leave_frees_the_peer() {
        let c = memory();
        let m = paired(&c).await;
        c.leave(&"s1".into()).await.unwrap();

        assert!(matches!(
            c.end_call(m.match_id).await.unwrap(),
            EndOutcome::AlreadyEnded(_)
        ));
        let s1 = c.presence().get(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(s1.status, SessionStatus::Offline);
        assert!(c.poll_for_match(&"s2".into()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_arrive_once_and_in_order() {
        const COUNT: usize = 200;
        let c = memory();
        let match_id = paired(&c).await.match_id;
        let delivered = Arc::new(AtomicUsize::new(0));

        let sender = {
            let c = c.clone();
            tokio::spawn(async move {
                for i in 0..COUNT {
                    c.send_negotiation_message(match_id, &"s1".into(), json!({"type": "candidate", "i": i}))
                        .await
                        .unwrap();
                }
            })
        };

        // Two pollers for the same consumer share one cursor.
        let pollers: Vec<_> = (0..2)
            .map(|_| {
                let c = c.clone();
                let delivered = delivered.clone();
                tokio::spawn(async move {
                    let mut got = Vec::new();
                    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
                    while delivered.load(Ordering::SeqCst) < COUNT
                        && std::time::Instant::now() < deadline
                    {
                        let batch = c.poll_negotiation_messages(match_id, &"s2".into()).await.unwrap();
                        delivered.fetch_add(batch.len(), Ordering::SeqCst);
                        got.extend(batch);
                        tokio::task::yield_now().await;
                    }
                    got
                })
            })
            .collect();

        sender.await.unwrap();
        let mut all = Vec::new();
        for poller in pollers {
            let got = poller.await.unwrap();
            assert!(got.windows(2).all(|w| w[0].seq < w[1].seq));
            all.extend(got);
        }

        assert_eq!(all.len(), COUNT);
        let unique: HashSet<i64> = all.iter().map(|e| e.seq).collect();
        assert_eq!(unique.len(), COUNT);

        all.sort_by_key(|e| e.seq);
        let order: Vec<u64> = all.iter().map(|e| e.payload["i"].as_u64().unwrap()).collect();
        assert_eq!(order, (0..COUNT as u64).collect::<Vec<_>>());
    }

    async fn interleaved_sends_keep_timestamps_in_order(c: Coordinator) {
        let match_id = paired(&c).await.match_id;

        let senders: Vec<_> = (0..4)
            .map(|task| {
                let c = c.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        c.send_negotiation_message(
                            match_id,
                            &"s1".into(),
                            json!({"type": "candidate", "task": task, "i": i}),
                        )
                        .await
                        .unwrap();
                    }
                })
            })
            .collect();
        for sender in futures_util::future::join_all(senders).await {
            sender.unwrap();
        }

        let got = c.poll_negotiation_messages(match_id, &"s2".into()).await.unwrap();
        assert_eq!(got.len(), 100);
        assert!(got.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(got.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_sends_keep_timestamps_in_order_in_memory() {
        interleaved_sends_keep_timestamps_in_order(memory()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_sends_keep_timestamps_in_order_on_sqlite() {
        interleaved_sends_keep_timestamps_in_order(sqlite().await).await;
    }

    #[tokio::test]
    async fn early_candidates_flush_after_offer() {
        let c = memory();
        let m = paired(&c).await;
        let (s1, s2) = (SessionId::from("s1"), SessionId::from("s2"));

        for payload in [
            json!({"type": "candidate", "candidate": "c1"}),
            json!({"type": "offer", "sdp": "o"}),
            json!({"type": "candidate", "candidate": "c2"}),
        ] {
            c.send_negotiation_message(m.match_id, &s1, payload).await.unwrap();
        }

        let mut inbox = NegotiationInbox::new(Role::Answer);
        let actions = inbox.accept(c.poll_negotiation_messages(m.match_id, &s2).await.unwrap());
        assert!(matches!(actions[0], InboxAction::ApplyRemoteDescription(_)));
        assert_eq!(
            &actions[1..],
            &[
                InboxAction::AddCandidate(json!({"type": "candidate", "candidate": "c1"})),
                InboxAction::AddCandidate(json!({"type": "candidate", "candidate": "c2"})),
            ]
        );
    }
}
