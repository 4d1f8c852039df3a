//! Signal message model — one opaque negotiation payload in a match's log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::SessionId;

/// A stored negotiation message.
///
/// `seq` is assigned by the store, strictly increasing across the whole log,
/// and is the delivery order. The store stamps `created_at` in the same step
/// and never lets it decrease along a match's log, so `seq` agrees with it and
/// breaks ties between messages written in the same millisecond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub seq: i64,
    pub match_id: Uuid,
    pub sender: SessionId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
