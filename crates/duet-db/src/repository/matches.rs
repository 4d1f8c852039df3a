//! Match repository — open/closed matches and partner history.

use chrono::{DateTime, Utc};
use duet_common::models::{Match, SessionId};
use sqlx::{Any, Executor};
use uuid::Uuid;

use crate::any_compat::to_millis;

/// Match row.
#[derive(Debug)]
pub struct MatchRow(pub Match);

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MatchRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        use crate::any_compat::*;
        use sqlx::Row;
        Ok(MatchRow(Match {
            id: get_uuid(row, "id")?,
            session_a: get_session_id(row, "session_a")?,
            session_b: get_session_id(row, "session_b")?,
            started_at: get_datetime(row, "started_at")?,
            ended_at: get_opt_datetime(row, "ended_at")?,
            duration_secs: row.try_get("duration_secs")?,
        }))
    }
}

pub async fn insert<'e, E>(exec: E, m: &Match) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query(
        r#"
        INSERT INTO matches (id, session_a, session_b, started_at, ended_at, duration_secs)
        VALUES (?, ?, ?, ?, NULL, NULL)
        "#,
    )
    .bind(m.id.to_string())
    .bind(m.session_a.as_str())
    .bind(m.session_b.as_str())
    .bind(to_millis(m.started_at))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn find_by_id<'e, E>(exec: E, id: Uuid) -> Result<Option<Match>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query_as::<_, MatchRow>("SELECT * FROM matches WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(exec)
        .await
        .map(|row| row.map(|r| r.0))
}

/// Stamp end time and duration on a still-open match. Returns whether this
/// call did the stamping.
pub async fn stamp_end<'e, E>(
    exec: E,
    id: Uuid,
    ended_at: DateTime<Utc>,
    duration_secs: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let result = sqlx::query(
        "UPDATE matches SET ended_at = ?, duration_secs = ? WHERE id = ? AND ended_at IS NULL",
    )
    .bind(to_millis(ended_at))
    .bind(duration_secs)
    .bind(id.to_string())
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Open matches where a participant is missing or has a stale heartbeat.
pub async fn find_abandoned<'e, E>(
    exec: E,
    stale_before: DateTime<Utc>,
) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let cutoff = to_millis(stale_before);
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT m.id FROM matches m
        LEFT JOIN sessions a ON a.id = m.session_a
        LEFT JOIN sessions b ON b.id = m.session_b
        WHERE m.ended_at IS NULL
        AND (
            a.id IS NULL OR b.id IS NULL
            OR a.last_heartbeat < ? OR b.last_heartbeat < ?
        )
        "#,
    )
    .bind(cutoff)
    .bind(cutoff)
    .fetch_all(exec)
    .await?;

    rows.into_iter()
        .map(|(id,)| Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e) as _)))
        .collect()
}

/// Partners of `id` in matches started at or after `since`.
pub async fn partners_since<'e, E>(
    exec: E,
    id: &SessionId,
    since: DateTime<Utc>,
) -> Result<Vec<SessionId>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT CASE WHEN session_a = ? THEN session_b ELSE session_a END AS partner
        FROM matches
        WHERE (session_a = ? OR session_b = ?) AND started_at >= ?
        "#,
    )
    .bind(id.as_str())
    .bind(id.as_str())
    .bind(id.as_str())
    .bind(to_millis(since))
    .fetch_all(exec)
    .await?;
    Ok(rows.into_iter().map(|(p,)| SessionId::new(p)).collect())
}

pub async fn count_open<'e, E>(exec: E) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matches WHERE ended_at IS NULL")
        .fetch_one(exec)
        .await?;
    Ok(n.max(0) as u64)
}
