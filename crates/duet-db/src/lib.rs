//! # duet-db
//!
//! The session store: the only shared mutable state in Duet.
//! - [`SessionStore`] — the narrow contract the coordinator depends on
//! - [`MemoryStore`] — single-process store, also used by tests
//! - [`SqlStore`] — relational store over `sqlx::AnyPool` (SQLite lite mode)

pub mod any_compat;
pub mod error;
pub mod memory;
pub mod repository;
mod schema;
pub mod sql;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sql::SqlStore;
pub use store::{CandidateQuery, CloseOutcome, SessionStore, StoreCounts};

use anyhow::Result;
use duet_common::config::DatabaseConfig;
use sqlx::AnyPool;
use std::sync::Arc;

/// `database.url` value that selects the in-process store.
pub const MEMORY_URL: &str = "memory";

/// Shared SQL connection pool.
#[derive(Clone)]
pub struct Database {
    pub pool: AnyPool,
}

impl Database {
    /// Connect to the configured SQL backend.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();

        // Every connection to `sqlite::memory:` opens its own empty database,
        // so an in-memory URL is pinned to a single long-lived connection.
        let in_memory = config.url.contains(":memory:");
        let (max, min) = if in_memory {
            (1, 1)
        } else {
            (config.max_connections, config.min_connections)
        };

        tracing::info!(url = %redact(&config.url), "Connecting to database...");
        let mut options = sqlx::any::AnyPoolOptions::new()
            .max_connections(max)
            .min_connections(min);
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options.connect(&config.url).await?;
        tracing::info!("Connected to database");

        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Migrations complete");
        Ok(())
    }
}

/// Open the store selected by `database.url`.
pub async fn connect_store(config: &DatabaseConfig) -> Result<Arc<dyn SessionStore>> {
    if config.url == MEMORY_URL {
        tracing::info!("Using in-memory session store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db = Database::connect(config).await?;
    db.migrate().await?;
    Ok(Arc::new(SqlStore::new(db.pool)))
}

/// Strip credentials from a connection URL before logging it.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
