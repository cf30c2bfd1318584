//! Dispatcher: the atomic claim.
//!
//! A claim moves the oldest QUEUED run to RUNNING and binds it to exactly
//! one worker, in a single short transaction. `FOR UPDATE SKIP LOCKED`
//! gives N concurrent workers disjoint rows with no external lock service:
//! each claimer locks a distinct candidate or sees an empty queue.

use sqlx::PgPool;
use uuid::Uuid;

use weir_db::models::{PipelineRun, PipelineVersionSnapshot};
use weir_db::queries::{catalog, runs};

use crate::error::{EngineError, EngineResult};

/// A successfully claimed run, paired with the pipeline version snapshot
/// the worker needs to execute it.
#[derive(Debug, Clone)]
pub struct ClaimedRun {
    pub run: PipelineRun,
    pub pipeline_version: PipelineVersionSnapshot,
}

/// Claim the oldest QUEUED run, optionally restricted to one tenant.
///
/// Returns `Ok(None)` when the queue is empty (or every candidate row is
/// locked by a concurrent claimer). On success the run is RUNNING with
/// `claimed_by = worker_id`, `claimed_at`/`heartbeat_at` fresh, and
/// `started_at` set if this was its first claim.
///
/// If the pipeline version vanished between enqueue and claim the whole
/// transaction rolls back and the run stays QUEUED.
pub async fn claim(
    pool: &PgPool,
    worker_id: &str,
    tenant_id: Option<Uuid>,
) -> EngineResult<Option<ClaimedRun>> {
    let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;

    let Some(run_id) = runs::select_queued_for_claim(&mut tx, tenant_id).await? else {
        // Nothing to do; commit the empty transaction.
        tx.commit().await.map_err(anyhow::Error::from)?;
        return Ok(None);
    };

    let run = runs::mark_running(&mut tx, run_id, worker_id).await?;

    let Some(pipeline_version) =
        catalog::get_version_snapshot(&mut tx, run.pipeline_version_id).await?
    else {
        // Dropping the transaction rolls the RUNNING transition back.
        return Err(EngineError::VersionVanished { run_id });
    };

    tx.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(
        run_id = %run.id,
        worker_id = %worker_id,
        tenant_id = %run.tenant_id,
        "run claimed"
    );

    Ok(Some(ClaimedRun {
        run,
        pipeline_version,
    }))
}
