//! # duet-match
//!
//! The coordinator for one-to-one video chat: it pairs strangers who are
//! waiting, relays their connection-negotiation messages, and closes the
//! call when either side leaves. Media never passes through here; once
//! negotiation succeeds the two browsers talk directly.
//!
//! Every component is a thin layer over a shared [`SessionStore`], so any
//! number of stateless replicas can run side by side:
//! - [`presence`] — heartbeats and liveness
//! - [`matcher`] — race-safe pairing of waiting sessions
//! - [`relay`] — per-match mailboxes with exactly-once delivery
//! - [`signaling`] — offer/answer roles and the client-side inbox
//! - [`lifecycle`] — ending calls and moderation reports
//! - [`reaper`] — optional background tidy-up of stale sessions
//!
//! [`SessionStore`]: duet_db::SessionStore

pub mod coordinator;
pub mod lifecycle;
pub mod matcher;
pub mod presence;
pub mod reaper;
pub mod relay;
pub mod settings;
pub mod signaling;

pub use coordinator::Coordinator;
pub use lifecycle::{EndOutcome, ReportOutcome};
pub use matcher::MatchResult;
pub use relay::SignalEnvelope;
pub use settings::{BlacklistPolicy, Settings};
pub use signaling::{NegotiationInbox, PayloadKind, Role};
