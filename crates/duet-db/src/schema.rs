//! Table definitions for the SQL store.
//!
//! Timestamps are epoch milliseconds. `signals.seq` is the delivery order.

pub(crate) const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id              TEXT PRIMARY KEY,
        status          TEXT NOT NULL,
        match_id        TEXT,
        last_heartbeat  BIGINT NOT NULL,
        created_at      BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_status_heartbeat ON sessions (status, last_heartbeat)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_match ON sessions (match_id)",
    r#"
    CREATE TABLE IF NOT EXISTS matches (
        id              TEXT PRIMARY KEY,
        session_a       TEXT NOT NULL,
        session_b       TEXT NOT NULL,
        started_at      BIGINT NOT NULL,
        ended_at        BIGINT,
        duration_secs   BIGINT,
        CHECK (session_a <> session_b)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_matches_open ON matches (ended_at)",
    r#"
    CREATE TABLE IF NOT EXISTS signals (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        match_id    TEXT NOT NULL,
        sender      TEXT NOT NULL,
        payload     TEXT NOT NULL,
        created_at  BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_signals_match_seq ON signals (match_id, seq)",
    r#"
    CREATE TABLE IF NOT EXISTS signal_cursors (
        match_id    TEXT NOT NULL,
        consumer    TEXT NOT NULL,
        last_seq    BIGINT NOT NULL,
        PRIMARY KEY (match_id, consumer)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reports (
        id          TEXT PRIMARY KEY,
        match_id    TEXT NOT NULL,
        reporter    TEXT NOT NULL,
        category    TEXT NOT NULL,
        created_at  BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reports_match ON reports (match_id)",
    r#"
    CREATE TABLE IF NOT EXISTS blacklist (
        session_id  TEXT PRIMARY KEY,
        added_at    BIGINT NOT NULL,
        expires_at  BIGINT
    )
    "#,
];
