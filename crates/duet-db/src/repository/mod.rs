//! Repository layer — query functions organized by table.
//!
//! Functions are generic over the executor so the same query runs against
//! the pool or inside a transaction.

pub mod matches;
pub mod moderation;
pub mod sessions;
pub mod signals;
