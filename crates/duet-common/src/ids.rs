//! ID generation.
//!
//! Match IDs are UUID v7: globally unique and time-sortable, so the newest
//! match is discoverable by ordering on the ID alone. Session IDs are opaque
//! random tokens; they only need to be unique and unguessable.

use uuid::Uuid;

use crate::models::SessionId;

/// Bytes of entropy in a generated session token.
const SESSION_TOKEN_BYTES: usize = 32;

/// Generate a new time-sortable ID using UUID v7.
///
/// UUID v7 provides:
/// - Monotonically increasing (time-sortable)
/// - 48 bits of Unix timestamp (millisecond precision)
/// - 74 bits of randomness (guaranteed unique across nodes)
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}

/// Mint a fresh session token: 256 random bits, hex-encoded.
pub fn generate_session_id() -> SessionId {
    let bytes: [u8; SESSION_TOKEN_BYTES] = rand::random();
    SessionId::new(hex::encode(bytes))
}
