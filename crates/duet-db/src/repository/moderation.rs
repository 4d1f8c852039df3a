//! Moderation repository — reports and the blacklist.

use chrono::{DateTime, Utc};
use duet_common::models::{Report, SessionId};
use sqlx::{Any, Executor};
use uuid::Uuid;

use crate::any_compat::to_millis;

pub async fn insert_report<'e, E>(exec: E, report: &Report) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query(
        r#"
        INSERT INTO reports (id, match_id, reporter, category, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(report.id.to_string())
    .bind(report.match_id.to_string())
    .bind(report.reporter.as_str())
    .bind(report.category.as_str())
    .bind(to_millis(report.created_at))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn count_distinct_reporters<'e, E>(exec: E, match_id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let (n,): (i64,) =
        sqlx::query_as("SELECT COUNT(DISTINCT reporter) FROM reports WHERE match_id = ?")
            .bind(match_id.to_string())
            .fetch_one(exec)
            .await?;
    Ok(n.max(0) as u64)
}

/// Insert a blacklist entry, or extend an existing one to the later expiry
/// (NULL = permanent wins).
pub async fn add_to_blacklist<'e, E>(
    exec: E,
    id: &SessionId,
    added_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query(
        r#"
        INSERT INTO blacklist (session_id, added_at, expires_at)
        VALUES (?, ?, ?)
        ON CONFLICT (session_id) DO UPDATE SET
            expires_at = CASE
                WHEN blacklist.expires_at IS NULL OR excluded.expires_at IS NULL THEN NULL
                WHEN excluded.expires_at > blacklist.expires_at THEN excluded.expires_at
                ELSE blacklist.expires_at
            END
        "#,
    )
    .bind(id.as_str())
    .bind(to_millis(added_at))
    .bind(expires_at.map(to_millis))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn is_blacklisted<'e, E>(
    exec: E,
    id: &SessionId,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT 1 FROM blacklist
        WHERE session_id = ? AND (expires_at IS NULL OR expires_at > ?)
        "#,
    )
    .bind(id.as_str())
    .bind(to_millis(now))
    .fetch_optional(exec)
    .await?;
    Ok(row.is_some())
}
