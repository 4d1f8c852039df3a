//! Negotiation roles and payload handling for the peer connection.
//!
//! The relay treats payloads as opaque JSON. Clients tag them with a
//! `type` field the same way a WebRTC description is tagged:
//!
//! ```json
//! { "type": "offer", "sdp": "v=0..." }
//! { "type": "answer", "sdp": "v=0..." }
//! { "type": "candidate", "candidate": "candidate:1 1 UDP ...", "sdpMid": "0" }
//! { "type": "bye" }
//! ```
//!
//! Exactly one side of a match creates the offer. Both sides derive the
//! same answer from the pair of ids alone, without talking to each other.

use std::collections::VecDeque;

use duet_common::models::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::relay::SignalEnvelope;

/// Which half of the offer/answer exchange a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Creates the offer.
    Offer,
    /// Waits for the offer and replies.
    Answer,
}

/// The side that creates the offer: the lexicographically smaller id.
pub fn initiator<'a>(a: &'a SessionId, b: &'a SessionId) -> &'a SessionId {
    if a <= b { a } else { b }
}

pub fn role_for(me: &SessionId, peer: &SessionId) -> Role {
    if initiator(me, peer) == me {
        Role::Offer
    } else {
        Role::Answer
    }
}

/// The `type` tag of a negotiation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Offer,
    Answer,
    Candidate,
    /// The sender is hanging up.
    Bye,
    /// Anything else; relayed untouched.
    Other,
}

impl PayloadKind {
    pub fn of(payload: &Value) -> Self {
        match payload.get("type").and_then(Value::as_str) {
            Some("offer") => Self::Offer,
            Some("answer") => Self::Answer,
            Some("candidate" | "ice_candidate" | "icecandidate") => Self::Candidate,
            Some("bye" | "hangup") => Self::Bye,
            _ => Self::Other,
        }
    }
}

/// What the receiving client should do with a delivered payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InboxAction {
    /// Set the remote description (an offer for the answerer, an answer for
    /// the offerer).
    ApplyRemoteDescription(Value),
    /// Add a remote ICE candidate.
    AddCandidate(Value),
    /// The peer hung up.
    Close,
    /// A description the local role does not expect (e.g. an offer arriving
    /// at the offerer).
    Unexpected(Value),
    Other(Value),
}

/// Client-side ordering of delivered payloads.
///
/// Candidates can be delivered before the description they belong to.
/// They are held until the remote description has been applied, then
/// released in the order they arrived.
#[derive(Debug)]
pub struct NegotiationInbox {
    role: Role,
    remote_description_applied: bool,
    pending_candidates: VecDeque<Value>,
    closed: bool,
}

impl NegotiationInbox {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            remote_description_applied: false,
            pending_candidates: VecDeque::new(),
            closed: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Candidates held back waiting for the remote description.
    pub fn pending(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Turn a batch of delivered envelopes into actions, in delivery order.
    pub fn accept<I>(&mut self, envelopes: I) -> Vec<InboxAction>
    where
        I: IntoIterator<Item = SignalEnvelope>,
    {
        let mut actions = Vec::new();
        for envelope in envelopes {
            if self.closed {
                break;
            }
            self.accept_one(envelope, &mut actions);
        }
        actions
    }

    fn accept_one(&mut self, envelope: SignalEnvelope, actions: &mut Vec<InboxAction>) {
        let expected = match self.role {
            Role::Offer => PayloadKind::Answer,
            Role::Answer => PayloadKind::Offer,
        };

        match envelope.kind {
            kind if kind == expected => {
                actions.push(InboxAction::ApplyRemoteDescription(envelope.payload));
                self.remote_description_applied = true;
                actions.extend(self.pending_candidates.drain(..).map(InboxAction::AddCandidate));
            }
            PayloadKind::Offer | PayloadKind::Answer => {
                tracing::warn!(
                    role = ?self.role,
                    kind = ?envelope.kind,
                    sender = %envelope.sender,
                    "Unexpected session description"
                );
                actions.push(InboxAction::Unexpected(envelope.payload));
            }
            PayloadKind::Candidate if self.remote_description_applied => {
                actions.push(InboxAction::AddCandidate(envelope.payload));
            }
            PayloadKind::Candidate => self.pending_candidates.push_back(envelope.payload),
            PayloadKind::Bye => {
                self.closed = true;
                self.pending_candidates.clear();
                actions.push(InboxAction::Close);
            }
            PayloadKind::Other => actions.push(InboxAction::Other(envelope.payload)),
        }
    }
}
