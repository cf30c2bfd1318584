//! Database query functions for the `pipeline_run_logs` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::PipelineRunLog;

/// Parameters for inserting a new log entry.
#[derive(Debug, Clone)]
pub struct NewRunLog {
    pub run_id: Uuid,
    /// Always the tenant of the referenced run; callers resolve it before
    /// inserting.
    pub tenant_id: Uuid,
    pub level: String,
    pub message: String,
    pub source: Option<String>,
    pub meta: Option<Value>,
}

/// Direction of a log range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOrder {
    #[default]
    Asc,
    Desc,
}

/// Range query parameters for a run's log stream.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Maximum number of entries to return; the caller clamps.
    pub limit: i64,
    /// Strict upper bound on `ts` (pagination backwards).
    pub before_ts: Option<DateTime<Utc>>,
    /// Strict lower bound on `ts` (tailing).
    pub after_ts: Option<DateTime<Utc>>,
    pub order: LogOrder,
}

/// Insert a new log entry. Returns the inserted row with server-generated
/// defaults (id, ts).
///
/// Takes a connection so the reaper/canceller can append inside their own
/// transactions; standalone appends pass a connection acquired from the
/// pool.
pub async fn insert_log(conn: &mut PgConnection, new: &NewRunLog) -> Result<PipelineRunLog> {
    let entry = sqlx::query_as::<_, PipelineRunLog>(
        "INSERT INTO pipeline_run_logs (run_id, tenant_id, level, message, source, meta) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.run_id)
    .bind(new.tenant_id)
    .bind(&new.level)
    .bind(&new.message)
    .bind(&new.source)
    .bind(&new.meta)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to insert log entry for run {}", new.run_id))?;

    Ok(entry)
}

/// List log entries for a run within the given time range, ordered by `ts`
/// in the requested direction. Ties on `ts` break by `id`.
pub async fn list_logs(
    pool: &PgPool,
    run_id: Uuid,
    query: &LogQuery,
) -> Result<Vec<PipelineRunLog>> {
    let sql = match query.order {
        LogOrder::Asc => {
            "SELECT * FROM pipeline_run_logs \
             WHERE run_id = $1 \
               AND ($2::timestamptz IS NULL OR ts < $2) \
               AND ($3::timestamptz IS NULL OR ts > $3) \
             ORDER BY ts ASC, id ASC \
             LIMIT $4"
        }
        LogOrder::Desc => {
            "SELECT * FROM pipeline_run_logs \
             WHERE run_id = $1 \
               AND ($2::timestamptz IS NULL OR ts < $2) \
               AND ($3::timestamptz IS NULL OR ts > $3) \
             ORDER BY ts DESC, id DESC \
             LIMIT $4"
        }
    };

    let entries = sqlx::query_as::<_, PipelineRunLog>(sql)
        .bind(run_id)
        .bind(query.before_ts)
        .bind(query.after_ts)
        .bind(query.limit)
        .fetch_all(pool)
        .await
        .with_context(|| format!("failed to list log entries for run {run_id}"))?;

    Ok(entries)
}

/// Count the log entries for a run.
pub async fn count_logs(pool: &PgPool, run_id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pipeline_run_logs WHERE run_id = $1")
        .bind(run_id)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to count log entries for run {run_id}"))?;

    Ok(row.0)
}
