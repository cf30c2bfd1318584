//! Database query functions for the `pipeline_runs` table.
//!
//! Every mutation here carries its state precondition in the UPDATE's WHERE
//! clause, so concurrent callers race on the row and exactly one wins; the
//! losers see zero rows affected and classify the conflict themselves.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{PipelineRun, RunStatus, TriggerType};

/// Parameters for inserting a new run row.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub tenant_id: Uuid,
    pub pipeline_version_id: Uuid,
    pub trigger_type: TriggerType,
    pub parameters: serde_json::Value,
    pub retry_of_run_id: Option<Uuid>,
    pub root_run_id: Option<Uuid>,
}

/// Optional filters for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub tenant_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub retry_of_run_id: Option<Uuid>,
}

/// Insert a new run row. The row is born QUEUED with server-generated
/// defaults (id, created_at, updated_at).
///
/// Takes a connection so retry can insert the child and its lineage log
/// entry in one transaction.
pub async fn insert_run(conn: &mut PgConnection, new: &NewRun) -> Result<PipelineRun> {
    let run = sqlx::query_as::<_, PipelineRun>(
        "INSERT INTO pipeline_runs \
             (tenant_id, pipeline_version_id, trigger_type, parameters, retry_of_run_id, root_run_id) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.tenant_id)
    .bind(new.pipeline_version_id)
    .bind(new.trigger_type)
    .bind(&new.parameters)
    .bind(new.retry_of_run_id)
    .bind(new.root_run_id)
    .fetch_one(&mut *conn)
    .await
    .context("failed to insert pipeline run")?;

    Ok(run)
}

/// Fetch a single run by ID.
pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<Option<PipelineRun>> {
    let run = sqlx::query_as::<_, PipelineRun>("SELECT * FROM pipeline_runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch pipeline run")?;

    Ok(run)
}

/// List runs, newest first, with optional tenant/status/lineage filters.
///
/// `limit` and `offset` are applied as given; the caller clamps them.
pub async fn list_runs(
    pool: &PgPool,
    filter: &RunFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<PipelineRun>> {
    let runs = sqlx::query_as::<_, PipelineRun>(
        "SELECT * FROM pipeline_runs \
         WHERE ($1::uuid IS NULL OR tenant_id = $1) \
           AND ($2::text IS NULL OR status = $2) \
           AND ($3::uuid IS NULL OR retry_of_run_id = $3) \
         ORDER BY created_at DESC \
         LIMIT $4 OFFSET $5",
    )
    .bind(filter.tenant_id)
    .bind(filter.status.map(|s| s.to_string()))
    .bind(filter.retry_of_run_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("failed to list pipeline runs")?;

    Ok(runs)
}

// -----------------------------------------------------------------------
// Dispatcher
// -----------------------------------------------------------------------

/// Select the oldest QUEUED run eligible for dispatch, locking the row and
/// skipping rows already locked by concurrent claimers.
///
/// Must run inside the claim transaction; the lock is held until commit.
pub async fn select_queued_for_claim(
    conn: &mut PgConnection,
    tenant_id: Option<Uuid>,
) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM pipeline_runs \
         WHERE status = 'QUEUED' \
           AND ($1::uuid IS NULL OR tenant_id = $1) \
         ORDER BY created_at ASC, id ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(tenant_id)
    .fetch_optional(&mut *conn)
    .await
    .context("failed to select a queued run for claim")?;

    Ok(row.map(|(id,)| id))
}

/// Transition a locked QUEUED run to RUNNING, binding the worker identity.
///
/// `started_at` records the first claim and is never overwritten; COALESCE
/// keeps any existing value.
pub async fn mark_running(
    conn: &mut PgConnection,
    id: Uuid,
    worker_id: &str,
) -> Result<PipelineRun> {
    let run = sqlx::query_as::<_, PipelineRun>(
        "UPDATE pipeline_runs \
         SET status = 'RUNNING', \
             started_at = COALESCE(started_at, NOW()), \
             claimed_at = NOW(), \
             claimed_by = $2, \
             heartbeat_at = NOW(), \
             updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(worker_id)
    .fetch_one(&mut *conn)
    .await
    .context("failed to mark run as running")?;

    Ok(run)
}

// -----------------------------------------------------------------------
// Liveness
// -----------------------------------------------------------------------

/// Refresh the heartbeat of a RUNNING run owned by `worker_id`.
///
/// The WHERE clause re-checks both predicates so a racing reap/cancel or a
/// stale worker cannot extend the wrong run's life. Returns the new
/// heartbeat timestamp, or `None` if the row no longer matched.
pub async fn touch_heartbeat(
    pool: &PgPool,
    id: Uuid,
    worker_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        "UPDATE pipeline_runs \
         SET heartbeat_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = 'RUNNING' AND claimed_by = $2 \
         RETURNING heartbeat_at",
    )
    .bind(id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("failed to refresh run heartbeat")?;

    Ok(row.map(|(ts,)| ts))
}

/// A RUNNING run whose heartbeat has aged past the staleness threshold.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StaleRun {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

/// Select up to `limit` stale RUNNING runs, oldest first, locking each row
/// and skipping rows already locked elsewhere.
///
/// Must run inside the reaper's transaction.
pub async fn select_stale_running(
    conn: &mut PgConnection,
    stale_after_seconds: i64,
    limit: i64,
) -> Result<Vec<StaleRun>> {
    let rows = sqlx::query_as::<_, StaleRun>(
        "SELECT id, tenant_id, heartbeat_at FROM pipeline_runs \
         WHERE status = 'RUNNING' \
           AND (heartbeat_at IS NULL \
                OR heartbeat_at < NOW() - $1::bigint * INTERVAL '1 second') \
         ORDER BY created_at ASC \
         LIMIT $2 \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(stale_after_seconds)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
    .context("failed to select stale running runs")?;

    Ok(rows)
}

/// Fail a locked stale run. Only called on rows already locked by
/// [`select_stale_running`], so no status guard is needed here.
pub async fn mark_stale_failed(
    conn: &mut PgConnection,
    id: Uuid,
    error_message: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE pipeline_runs \
         SET status = 'FAILED', finished_at = NOW(), updated_at = NOW(), error_message = $2 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(error_message)
    .execute(&mut *conn)
    .await
    .context("failed to mark stale run as failed")?;

    Ok(())
}

// -----------------------------------------------------------------------
// Lifecycle
// -----------------------------------------------------------------------

/// Transition a RUNNING run to a terminal status (SUCCEEDED or FAILED).
///
/// The `status = 'RUNNING'` guard makes the operation race-safe: a late
/// complete after a cancel or reap affects zero rows and returns `None`.
/// `error_message` is only stored on FAILED; SUCCEEDED forces it to NULL.
pub async fn complete_running(
    pool: &PgPool,
    id: Uuid,
    status: RunStatus,
    error_message: Option<&str>,
) -> Result<Option<PipelineRun>> {
    let run = sqlx::query_as::<_, PipelineRun>(
        "UPDATE pipeline_runs \
         SET status = $2, \
             finished_at = NOW(), \
             heartbeat_at = NOW(), \
             updated_at = NOW(), \
             error_message = CASE WHEN $2 = 'FAILED' THEN $3 ELSE NULL END \
         WHERE id = $1 AND status = 'RUNNING' \
         RETURNING *",
    )
    .bind(id)
    .bind(status)
    .bind(error_message)
    .fetch_optional(pool)
    .await
    .context("failed to complete run")?;

    Ok(run)
}

/// Cancel a QUEUED or RUNNING run. Returns the updated row, or `None` if
/// the run was already terminal (or missing).
///
/// Takes a connection so the cancellation log entry lands in the same
/// transaction.
pub async fn cancel_active(conn: &mut PgConnection, id: Uuid) -> Result<Option<PipelineRun>> {
    let run = sqlx::query_as::<_, PipelineRun>(
        "UPDATE pipeline_runs \
         SET status = 'CANCELLED', \
             finished_at = NOW(), \
             updated_at = NOW(), \
             error_message = 'Cancelled by admin' \
         WHERE id = $1 AND status IN ('QUEUED', 'RUNNING') \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .context("failed to cancel run")?;

    Ok(run)
}
