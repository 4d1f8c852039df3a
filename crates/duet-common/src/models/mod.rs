//! Core domain models shared across all Duet crates.
//!
//! These are the "truth" types: what the session store persists and the API serializes.
//! Match IDs are UUID v7 (time-sortable); session IDs are opaque client tokens.

pub mod call;
pub mod report;
pub mod session;
pub mod signal;

/// Re-export all model types for convenience.
pub use call::*;
pub use report::*;
pub use session::*;
pub use signal::*;
