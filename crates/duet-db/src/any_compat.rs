//! AnyPool row-extraction helpers.
//!
//! `sqlx::AnyPool` only natively decodes primitive types (i8/i16/i32/i64,
//! f32/f64, bool, String, &[u8]). UUIDs, session tokens and enum tags are
//! stored as TEXT, timestamps as epoch milliseconds in BIGINT columns, JSON
//! payloads as TEXT. Everything is converted here.
//!
//! All functions return `sqlx::Error` so they fit naturally into
//! `sqlx::FromRow` manual implementations.

use chrono::{DateTime, Utc};
use duet_common::models::{SessionId, SessionStatus};
use sqlx::{any::AnyRow, Row};
use uuid::Uuid;

fn decode_err(msg: impl Into<String>) -> sqlx::Error {
    let msg: String = msg.into();
    sqlx::Error::Decode(msg.into())
}

// ── Uuid ─────────────────────────────────────────────────────────────────────

pub fn get_uuid(row: &AnyRow, col: &str) -> Result<Uuid, sqlx::Error> {
    let s: String = row.try_get(col)?;
    Uuid::parse_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
}

pub fn get_opt_uuid(row: &AnyRow, col: &str) -> Result<Option<Uuid>, sqlx::Error> {
    let s: Option<String> = row.try_get(col)?;
    s.map(|v| Uuid::parse_str(&v).map_err(|e| sqlx::Error::Decode(Box::new(e) as _)))
        .transpose()
}

// ── Domain tags ──────────────────────────────────────────────────────────────

pub fn get_session_id(row: &AnyRow, col: &str) -> Result<SessionId, sqlx::Error> {
    let s: String = row.try_get(col)?;
    Ok(SessionId::new(s))
}

pub fn get_status(row: &AnyRow, col: &str) -> Result<SessionStatus, sqlx::Error> {
    let s: String = row.try_get(col)?;
    s.parse().map_err(decode_err)
}

// ── DateTime<Utc> ─────────────────────────────────────────────────────────────

pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| decode_err(format!("timestamp out of range: {ms}")))
}

pub fn get_datetime(row: &AnyRow, col: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let ms: i64 = row.try_get(col)?;
    from_millis(ms)
}

pub fn get_opt_datetime(row: &AnyRow, col: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let ms: Option<i64> = row.try_get(col)?;
    ms.map(from_millis).transpose()
}

// ── serde_json::Value ─────────────────────────────────────────────────────────

pub fn get_json_value(row: &AnyRow, col: &str) -> Result<serde_json::Value, sqlx::Error> {
    let s: String = row.try_get(col)?;
    serde_json::from_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
}
