//! Session repository — presence rows and their conditional transitions.

use chrono::{DateTime, Utc};
use duet_common::models::{Session, SessionId, SessionStatus};
use sqlx::{Any, Executor, QueryBuilder};
use uuid::Uuid;

use crate::any_compat::to_millis;
use crate::store::CandidateQuery;

/// Session row.
#[derive(Debug)]
pub struct SessionRow(pub Session);

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for SessionRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        use crate::any_compat::*;
        Ok(SessionRow(Session {
            id: get_session_id(row, "id")?,
            status: get_status(row, "status")?,
            last_heartbeat: get_datetime(row, "last_heartbeat")?,
            match_id: get_opt_uuid(row, "match_id")?,
            created_at: get_datetime(row, "created_at")?,
        }))
    }
}

/// Insert or heartbeat a session.
///
/// An `in_call` row keeps its status and match; `in_call` is never written
/// from here.
pub async fn upsert<'e, E>(
    exec: E,
    id: &SessionId,
    status: SessionStatus,
    now: DateTime<Utc>,
) -> Result<Session, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let insert_status = match status {
        SessionStatus::InCall => SessionStatus::Waiting,
        other => other,
    };

    sqlx::query_as::<_, SessionRow>(
        r#"
        INSERT INTO sessions (id, status, match_id, last_heartbeat, created_at)
        VALUES (?, ?, NULL, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            last_heartbeat = excluded.last_heartbeat,
            status = CASE
                WHEN sessions.status = 'in_call' OR ? = 'in_call' THEN sessions.status
                ELSE excluded.status
            END
        RETURNING *
        "#,
    )
    .bind(id.as_str())
    .bind(insert_status.as_str())
    .bind(to_millis(now))
    .bind(to_millis(now))
    .bind(status.as_str())
    .fetch_one(exec)
    .await
    .map(|row| row.0)
}

pub async fn find_by_id<'e, E>(exec: E, id: &SessionId) -> Result<Option<Session>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(exec)
        .await
        .map(|row| row.map(|r| r.0))
}

/// Conditional status transition. Returns whether the row matched `expected`.
pub async fn compare_and_set<'e, E>(
    exec: E,
    id: &SessionId,
    expected: SessionStatus,
    new: SessionStatus,
    match_id: Option<Uuid>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let result = sqlx::query("UPDATE sessions SET status = ?, match_id = ? WHERE id = ? AND status = ?")
        .bind(new.as_str())
        .bind(match_id.map(|m| m.to_string()))
        .bind(id.as_str())
        .bind(expected.as_str())
        .execute(exec)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Move one waiting, non-blacklisted session into a match. `fresh_since`
/// guards against claiming a candidate whose heartbeat aged out after it was
/// selected; the blacklist is read again for one reported in between.
pub async fn claim<'e, E>(
    exec: E,
    id: &SessionId,
    match_id: Uuid,
    fresh_since: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let result = sqlx::query(
        r#"
        UPDATE sessions SET status = 'in_call', match_id = ?
        WHERE id = ? AND status = 'waiting' AND match_id IS NULL AND last_heartbeat >= ?
          AND id NOT IN (
              SELECT session_id FROM blacklist WHERE expires_at IS NULL OR expires_at > ?
          )
        "#,
    )
    .bind(match_id.to_string())
    .bind(id.as_str())
    .bind(fresh_since.map(to_millis).unwrap_or(i64::MIN))
    .bind(to_millis(now))
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Return both participants still in `match_id` to the waiting pool.
pub async fn release_match<'e, E>(exec: E, match_id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let result = sqlx::query(
        "UPDATE sessions SET status = 'waiting', match_id = NULL WHERE match_id = ? AND status = 'in_call'",
    )
    .bind(match_id.to_string())
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

/// Freshest eligible waiting session.
pub async fn find_candidate<'e, E>(
    exec: E,
    query: &CandidateQuery,
) -> Result<Option<Session>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let mut qb = QueryBuilder::<Any>::new(
        "SELECT * FROM sessions WHERE status = 'waiting' AND match_id IS NULL AND id <> ",
    );
    qb.push_bind(query.requester.as_str().to_string());
    qb.push(" AND last_heartbeat >= ");
    qb.push_bind(to_millis(query.fresh_since));
    qb.push(
        " AND id NOT IN (SELECT session_id FROM blacklist WHERE expires_at IS NULL OR expires_at > ",
    );
    qb.push_bind(to_millis(query.now));
    qb.push(")");

    if !query.excluded.is_empty() {
        qb.push(" AND id NOT IN (");
        let mut separated = qb.separated(", ");
        for id in &query.excluded {
            separated.push_bind(id.as_str().to_string());
        }
        separated.push_unseparated(")");
    }

    qb.push(" ORDER BY last_heartbeat DESC, id ASC LIMIT 1");

    qb.build_query_as::<SessionRow>()
        .fetch_optional(exec)
        .await
        .map(|row| row.map(|r| r.0))
}

/// Mark stale waiting sessions offline, returning their ids.
pub async fn mark_stale_offline<'e, E>(
    exec: E,
    stale_before: DateTime<Utc>,
) -> Result<Vec<SessionId>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        UPDATE sessions SET status = 'offline'
        WHERE status = 'waiting' AND last_heartbeat < ?
        RETURNING id
        "#,
    )
    .bind(to_millis(stale_before))
    .fetch_all(exec)
    .await?;
    Ok(rows.into_iter().map(|(id,)| SessionId::new(id)).collect())
}

/// Session count per status.
pub async fn count_by_status<'e, E>(exec: E) -> Result<Vec<(SessionStatus, u64)>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) AS n FROM sessions GROUP BY status")
            .fetch_all(exec)
            .await?;

    rows.into_iter()
        .map(|(status, n)| {
            let status = status
                .parse::<SessionStatus>()
                .map_err(|e| sqlx::Error::Decode(e.into()))?;
            Ok((status, n.max(0) as u64))
        })
        .collect()
}
