//! Per-run log streams.
//!
//! Logs are append-only and tenant-scoped: every entry copies the
//! `tenant_id` of its run at insert time, so tenant-wide scans never need
//! the join back to `pipeline_runs`. Queries sort by `ts` explicitly;
//! ties break by `id`, which is acceptable because log reads are advisory.

use sqlx::PgPool;
use uuid::Uuid;

use weir_db::models::PipelineRunLog;
use weir_db::queries::run_logs::{self, LogQuery, NewRunLog};
use weir_db::queries::runs;

use crate::error::{EngineError, EngineResult};

/// Log query limit clamp: [1, 1000], defaulting to 200 when unspecified.
pub const DEFAULT_QUERY_LIMIT: i64 = 200;
const MAX_QUERY_LIMIT: i64 = 1000;

/// A log entry as submitted by a worker or the control plane itself.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub level: String,
    pub message: String,
    pub source: Option<String>,
    pub meta: Option<serde_json::Value>,
}

/// Append a log entry to a run's stream.
///
/// Resolves the run first -- both to reject appends against unknown runs
/// and to stamp the entry with the run's `tenant_id`.
pub async fn append(
    pool: &PgPool,
    run_id: Uuid,
    entry: NewLogEntry,
) -> EngineResult<PipelineRunLog> {
    let run = runs::get_run(pool, run_id)
        .await?
        .ok_or(EngineError::RunNotFound)?;

    let mut conn = pool.acquire().await.map_err(anyhow::Error::from)?;
    let log = run_logs::insert_log(
        &mut conn,
        &NewRunLog {
            run_id: run.id,
            tenant_id: run.tenant_id,
            level: entry.level,
            message: entry.message,
            source: entry.source,
            meta: entry.meta,
        },
    )
    .await?;

    Ok(log)
}

/// Query a run's log stream.
///
/// The limit is clamped to [1, 1000]. A missing run is an error so the
/// HTTP layer can distinguish "no logs yet" from "no such run".
pub async fn query(
    pool: &PgPool,
    run_id: Uuid,
    mut query: LogQuery,
) -> EngineResult<Vec<PipelineRunLog>> {
    if runs::get_run(pool, run_id).await?.is_none() {
        return Err(EngineError::RunNotFound);
    }

    query.limit = query.limit.clamp(1, MAX_QUERY_LIMIT);
    let entries = run_logs::list_logs(pool, run_id, &query).await?;
    Ok(entries)
}
