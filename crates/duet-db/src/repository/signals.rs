//! Signal repository — per-match negotiation logs and consumer cursors.
//!
//! Delivery order is `seq` (AUTOINCREMENT), never the wall-clock timestamp:
//! two sends in the same millisecond still have a strict order. The insert
//! clamps `created_at` to the match's latest so the two never disagree.

use chrono::{DateTime, Utc};
use duet_common::models::{SessionId, SignalMessage};
use sqlx::{Any, Executor};
use uuid::Uuid;

use crate::any_compat::to_millis;

/// Signal row.
#[derive(Debug)]
pub struct SignalRow(pub SignalMessage);

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for SignalRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        use crate::any_compat::*;
        use sqlx::Row;
        Ok(SignalRow(SignalMessage {
            seq: row.try_get("seq")?,
            match_id: get_uuid(row, "match_id")?,
            sender: get_session_id(row, "sender")?,
            payload: get_json_value(row, "payload")?,
            created_at: get_datetime(row, "created_at")?,
        }))
    }
}

/// Append one message. `created_at` is `now` or the match's latest
/// `created_at`, whichever is later, read in the same statement.
pub async fn insert<'e, E>(
    exec: E,
    match_id: Uuid,
    sender: &SessionId,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<SignalMessage, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let payload = serde_json::to_string(payload)
        .map_err(|e| sqlx::Error::Encode(Box::new(e) as _))?;
    let match_id = match_id.to_string();

    sqlx::query_as::<_, SignalRow>(
        r#"
        INSERT INTO signals (match_id, sender, payload, created_at)
        VALUES (?, ?, ?, MAX(?, COALESCE(
            (SELECT MAX(created_at) FROM signals WHERE match_id = ?), 0
        )))
        RETURNING *
        "#,
    )
    .bind(match_id.clone())
    .bind(sender.as_str())
    .bind(payload)
    .bind(to_millis(now))
    .bind(match_id)
    .fetch_one(exec)
    .await
    .map(|row| row.0)
}

/// Messages after `after_seq` not authored by `exclude_sender`, ascending.
pub async fn list_after<'e, E>(
    exec: E,
    match_id: Uuid,
    exclude_sender: &SessionId,
    after_seq: i64,
) -> Result<Vec<SignalMessage>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query_as::<_, SignalRow>(
        r#"
        SELECT * FROM signals
        WHERE match_id = ? AND sender <> ? AND seq > ?
        ORDER BY seq ASC
        "#,
    )
    .bind(match_id.to_string())
    .bind(exclude_sender.as_str())
    .bind(after_seq)
    .fetch_all(exec)
    .await
    .map(|rows| rows.into_iter().map(|r| r.0).collect())
}

pub async fn get_cursor<'e, E>(
    exec: E,
    match_id: Uuid,
    consumer: &SessionId,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT last_seq FROM signal_cursors WHERE match_id = ? AND consumer = ?")
            .bind(match_id.to_string())
            .bind(consumer.as_str())
            .fetch_optional(exec)
            .await?;
    Ok(row.map(|(seq,)| seq).unwrap_or(0))
}

/// Compare-and-set on the stored cursor. A missing row counts as 0.
pub async fn advance_cursor(
    pool: &sqlx::AnyPool,
    match_id: Uuid,
    consumer: &SessionId,
    expected: i64,
    new: i64,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        r#"
        UPDATE signal_cursors SET last_seq = ?
        WHERE match_id = ? AND consumer = ? AND last_seq = ?
        "#,
    )
    .bind(new)
    .bind(match_id.to_string())
    .bind(consumer.as_str())
    .bind(expected)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 1 {
        return Ok(true);
    }
    if expected != 0 {
        return Ok(false);
    }

    // First advance for this consumer: whoever inserts the row wins.
    let inserted = sqlx::query(
        r#"
        INSERT INTO signal_cursors (match_id, consumer, last_seq)
        VALUES (?, ?, ?)
        ON CONFLICT (match_id, consumer) DO NOTHING
        "#,
    )
    .bind(match_id.to_string())
    .bind(consumer.as_str())
    .bind(new)
    .execute(pool)
    .await?;
    Ok(inserted.rows_affected() == 1)
}

/// Delete logs and cursors of matches that ended before `ended_before`.
pub async fn prune_ended(
    pool: &sqlx::AnyPool,
    ended_before: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let cutoff = to_millis(ended_before);

    let removed = sqlx::query(
        r#"
        DELETE FROM signals WHERE match_id IN (
            SELECT id FROM matches WHERE ended_at IS NOT NULL AND ended_at < ?
        )
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM signal_cursors WHERE match_id IN (
            SELECT id FROM matches WHERE ended_at IS NOT NULL AND ended_at < ?
        )
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(removed.rows_affected())
}
