//! # duet-common
//!
//! Shared types, configuration, error handling, and utilities used across all Duet crates.
//! The foundation layer: primitives and contracts, no business logic.

pub mod config;
pub mod error;
pub mod ids;
pub mod models;
pub mod validation;
