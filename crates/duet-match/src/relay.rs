//! Signal relay — per-match mailboxes for negotiation payloads.
//!
//! Each match has an append-only log ordered by the store-assigned `seq`.
//! Each participant has a consumption cursor; a poll returns everything the
//! peer sent past the cursor and moves the cursor with a compare-and-set,
//! so concurrent polls by the same session never hand out a message twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use duet_common::{
    error::{DuetError, DuetResult},
    models::{Match, SessionId, SignalMessage},
};
use duet_db::SessionStore;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::signaling::PayloadKind;

/// A delivered negotiation payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalEnvelope {
    pub seq: i64,
    pub sender: SessionId,
    pub kind: PayloadKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl From<SignalMessage> for SignalEnvelope {
    fn from(msg: SignalMessage) -> Self {
        Self {
            seq: msg.seq,
            sender: msg.sender,
            kind: PayloadKind::of(&msg.payload),
            payload: msg.payload,
            created_at: msg.created_at,
        }
    }
}

#[derive(Clone)]
pub struct SignalRelay {
    store: Arc<dyn SessionStore>,
    max_payload_bytes: usize,
}

impl SignalRelay {
    pub fn new(store: Arc<dyn SessionStore>, max_payload_bytes: usize) -> Self {
        Self {
            store,
            max_payload_bytes,
        }
    }

    /// Append `payload` to the match log on behalf of `sender`.
    ///
    /// The match must exist, be open, and include `sender`.
    pub async fn send(
        &self,
        match_id: Uuid,
        sender: &SessionId,
        payload: Value,
    ) -> DuetResult<SignalEnvelope> {
        let size = serde_json::to_vec(&payload)
            .map_err(|e| DuetError::Validation {
                message: format!("Unserializable payload: {e}"),
            })?
            .len();
        if size > self.max_payload_bytes {
            return Err(DuetError::PayloadTooLarge {
                limit: self.max_payload_bytes,
            });
        }

        let m = self.participant_match(match_id, sender).await?;
        if !m.is_open() {
            return Err(DuetError::MatchEnded);
        }

        let stored = self
            .store
            .insert_signal(match_id, sender, &payload, Utc::now())
            .await?;
        let envelope = SignalEnvelope::from(stored);
        tracing::debug!(
            match_id = %match_id,
            sender = %sender,
            seq = envelope.seq,
            kind = ?envelope.kind,
            "Signal queued"
        );
        Ok(envelope)
    }

    /// Everything the peer sent since `me` last polled, ascending by `seq`.
    ///
    /// Each message is returned exactly once per consumer. A poll that loses
    /// the cursor race to a concurrent poll by the same session returns an
    /// empty batch; the winner delivered those messages.
    pub async fn receive_new(
        &self,
        match_id: Uuid,
        me: &SessionId,
    ) -> DuetResult<Vec<SignalEnvelope>> {
        self.participant_match(match_id, me).await?;

        let cursor = self.store.signal_cursor(match_id, me).await?;
        let messages = self.store.signals_after(match_id, me, cursor).await?;
        let Some(last) = messages.last().map(|m| m.seq) else {
            return Ok(Vec::new());
        };

        if !self
            .store
            .advance_signal_cursor(match_id, me, cursor, last)
            .await?
        {
            tracing::debug!(match_id = %match_id, consumer = %me, "Lost cursor race");
            return Ok(Vec::new());
        }

        tracing::debug!(
            match_id = %match_id,
            consumer = %me,
            count = messages.len(),
            cursor = last,
            "Signals delivered"
        );
        Ok(messages.into_iter().map(SignalEnvelope::from).collect())
    }

    /// Re-read the peer's messages after `after_seq` without moving the
    /// cursor. Lets a client recover a batch whose response it never saw.
    pub async fn replay(
        &self,
        match_id: Uuid,
        me: &SessionId,
        after_seq: i64,
    ) -> DuetResult<Vec<SignalEnvelope>> {
        self.participant_match(match_id, me).await?;
        let messages = self.store.signals_after(match_id, me, after_seq).await?;
        Ok(messages.into_iter().map(SignalEnvelope::from).collect())
    }

    async fn participant_match(&self, match_id: Uuid, session: &SessionId) -> DuetResult<Match> {
        let m = self
            .store
            .get_match(match_id)
            .await?
            .ok_or_else(|| DuetError::NotFound {
                resource: "Match".into(),
            })?;
        if !m.involves(session) {
            return Err(DuetError::NotParticipant);
        }
        Ok(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_common::models::SessionStatus;
    use duet_db::MemoryStore;
    use serde_json::json;

    async fn open_match(store: &Arc<dyn SessionStore>) -> Match {
        let now = Utc::now();
        store.upsert_session(&"s1".into(), SessionStatus::Waiting, now).await.unwrap();
        store.upsert_session(&"s2".into(), SessionStatus::Waiting, now).await.unwrap();
        let m = Match::open(Uuid::now_v7(), "s1".into(), "s2".into(), now).unwrap();
        assert!(store.claim_pair(&m, now - chrono::Duration::seconds(10), now).await.unwrap());
        m
    }

    fn setup() -> (Arc<dyn SessionStore>, SignalRelay) {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let relay = SignalRelay::new(store.clone(), 1024);
        (store, relay)
    }

    #[tokio::test]
    async fn delivers_peer_messages_once_in_order() {
        let (store, relay) = setup();
        let m = open_match(&store).await;
        let (s1, s2) = (SessionId::from("s1"), SessionId::from("s2"));

        relay.send(m.id, &s1, json!({"type": "offer", "sdp": "o"})).await.unwrap();
        relay.send(m.id, &s1, json!({"type": "candidate", "candidate": "c1"})).await.unwrap();
        relay.send(m.id, &s2, json!({"type": "candidate", "candidate": "c2"})).await.unwrap();

        let batch = relay.receive_new(m.id, &s2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].seq < batch[1].seq);
        assert_eq!(batch[0].kind, PayloadKind::Offer);
        assert!(batch.iter().all(|e| e.sender == s1));

        assert!(relay.receive_new(m.id, &s2).await.unwrap().is_empty());

        let other = relay.receive_new(m.id, &s1).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].sender, s2);
    }

    #[tokio::test]
    async fn replay_does_not_move_the_cursor() {
        let (store, relay) = setup();
        let m = open_match(&store).await;
        let (s1, s2) = (SessionId::from("s1"), SessionId::from("s2"));

        relay.send(m.id, &s1, json!({"type": "offer"})).await.unwrap();
        assert_eq!(relay.replay(m.id, &s2, 0).await.unwrap().len(), 1);
        assert_eq!(relay.receive_new(m.id, &s2).await.unwrap().len(), 1);
        assert_eq!(relay.replay(m.id, &s2, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_outsiders_and_unknown_matches() {
        let (store, relay) = setup();
        let m = open_match(&store).await;

        let err = relay
            .send(m.id, &"s3".into(), json!({"type": "offer"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DuetError::NotParticipant));

        let err = relay.receive_new(Uuid::now_v7(), &"s1".into()).await.unwrap_err();
        assert!(matches!(err, DuetError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rejects_oversized_payloads() {
        let (store, relay) = setup();
        let m = open_match(&store).await;
        let big = json!({"type": "offer", "sdp": "x".repeat(2048)});
        let err = relay.send(m.id, &"s1".into(), big).await.unwrap_err();
        assert!(matches!(err, DuetError::PayloadTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn ended_match_refuses_new_signals_but_drains() {
        let (store, relay) = setup();
        let m = open_match(&store).await;
        let (s1, s2) = (SessionId::from("s1"), SessionId::from("s2"));

        relay.send(m.id, &s1, json!({"type": "bye"})).await.unwrap();
        store.close_match(m.id, Utc::now()).await.unwrap();

        let err = relay.send(m.id, &s1, json!({"type": "offer"})).await.unwrap_err();
        assert!(matches!(err, DuetError::MatchEnded));

        let batch = relay.receive_new(m.id, &s2).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, PayloadKind::Bye);
    }
}
