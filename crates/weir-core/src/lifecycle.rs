//! Lifecycle controller: submit, complete, cancel, retry.
//!
//! State preconditions live in the WHERE clause of each UPDATE; cancel and
//! retry additionally pre-classify through [`RunStateMachine`] so callers
//! get a precise conflict, and a zero-row UPDATE re-reads the row to report
//! the state that won the race. Retry never mutates the parent -- it
//! creates a fresh QUEUED child carrying the lineage pointers.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use weir_db::models::{PipelineRun, RunStatus, TriggerType, VersionStatus};
use weir_db::queries::run_logs::{self, NewRunLog};
use weir_db::queries::runs::{self, NewRun};
use weir_db::queries::catalog;

use crate::error::{EngineError, EngineResult};
use crate::state::RunStateMachine;

/// The two terminal statuses a worker may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionStatus {
    Succeeded,
    Failed,
}

impl From<CompletionStatus> for RunStatus {
    fn from(c: CompletionStatus) -> Self {
        match c {
            CompletionStatus::Succeeded => RunStatus::Succeeded,
            CompletionStatus::Failed => RunStatus::Failed,
        }
    }
}

/// A run submission: the catalog-facing entry point that enqueues work.
#[derive(Debug, Clone)]
pub struct RunSubmission {
    pub tenant_id: Uuid,
    pub pipeline_version_id: Uuid,
    pub parameters: serde_json::Value,
}

/// Outcome of a retry: the new child run plus the parent it descends from.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub run: PipelineRun,
    pub retry_of: Uuid,
}

/// Enqueue a new QUEUED run for an APPROVED pipeline version.
pub async fn submit(pool: &PgPool, submission: RunSubmission) -> EngineResult<PipelineRun> {
    let version = catalog::get_pipeline_version(pool, submission.pipeline_version_id)
        .await?
        .ok_or(EngineError::VersionNotFound)?;
    if version.status != VersionStatus::Approved {
        return Err(EngineError::VersionNotApproved);
    }

    let mut conn = pool.acquire().await.map_err(anyhow::Error::from)?;
    let run = runs::insert_run(
        &mut conn,
        &NewRun {
            tenant_id: submission.tenant_id,
            pipeline_version_id: submission.pipeline_version_id,
            trigger_type: TriggerType::Manual,
            parameters: submission.parameters,
            retry_of_run_id: None,
            root_run_id: None,
        },
    )
    .await?;

    tracing::info!(run_id = %run.id, tenant_id = %run.tenant_id, "run queued");
    Ok(run)
}

/// Complete a RUNNING run with a terminal status reported by its worker.
///
/// The `status = 'RUNNING'` guard makes this idempotent in effect and
/// race-safe against cancel/reap: the first caller wins, later callers get
/// `InvalidState` and the row is untouched. `error_message` is stored only
/// on FAILED.
pub async fn complete(
    pool: &PgPool,
    run_id: Uuid,
    status: CompletionStatus,
    error_message: Option<&str>,
) -> EngineResult<PipelineRun> {
    match runs::complete_running(pool, run_id, status.into(), error_message).await? {
        Some(run) => {
            tracing::info!(run_id = %run.id, status = %run.status, "run completed");
            Ok(run)
        }
        None => {
            let run = runs::get_run(pool, run_id)
                .await?
                .ok_or(EngineError::RunNotFound)?;
            Err(EngineError::InvalidState { status: run.status })
        }
    }
}

/// Cancel a QUEUED or RUNNING run.
///
/// Cancellation is cooperative: a RUNNING run's worker keeps executing
/// until its next `complete`, which then loses the `status = 'RUNNING'`
/// race and observes the cancellation as a conflict. The cancellation log
/// entry lands in the same transaction as the state change.
pub async fn cancel(pool: &PgPool, run_id: Uuid) -> EngineResult<PipelineRun> {
    // Classify before mutating so terminal runs get a precise conflict.
    let current = runs::get_run(pool, run_id)
        .await?
        .ok_or(EngineError::RunNotFound)?;
    if !RunStateMachine::is_cancellable(current.status) {
        return Err(EngineError::InvalidState {
            status: current.status,
        });
    }

    let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;

    let Some(run) = runs::cancel_active(&mut tx, run_id).await? else {
        // Lost a race between the read and the guarded UPDATE.
        let run = runs::get_run(pool, run_id)
            .await?
            .ok_or(EngineError::RunNotFound)?;
        return Err(EngineError::InvalidState { status: run.status });
    };

    run_logs::insert_log(
        &mut tx,
        &NewRunLog {
            run_id: run.id,
            tenant_id: run.tenant_id,
            level: "WARN".to_owned(),
            message: "Run cancelled".to_owned(),
            source: Some("control-plane".to_owned()),
            meta: Some(serde_json::json!({ "status": RunStatus::Cancelled })),
        },
    )
    .await?;

    tx.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(run_id = %run.id, "run cancelled");
    Ok(run)
}

/// Create a new QUEUED run retrying a FAILED or CANCELLED parent.
///
/// The child inherits the parent's tenant and pipeline version (which must
/// still be APPROVED), takes `parameters_override` if given, and carries
/// the lineage: `retry_of_run_id` points at the parent, `root_run_id` at
/// the head of the chain.
pub async fn retry(
    pool: &PgPool,
    run_id: Uuid,
    parameters_override: Option<serde_json::Value>,
) -> EngineResult<RetryOutcome> {
    let parent = runs::get_run(pool, run_id)
        .await?
        .ok_or(EngineError::RunNotFound)?;

    if !RunStateMachine::is_retryable(parent.status) {
        return Err(EngineError::InvalidState {
            status: parent.status,
        });
    }

    let version = catalog::get_pipeline_version(pool, parent.pipeline_version_id)
        .await?
        .ok_or(EngineError::VersionNotFound)?;
    if version.status != VersionStatus::Approved {
        return Err(EngineError::VersionNotApproved);
    }

    let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;

    let child = runs::insert_run(
        &mut tx,
        &NewRun {
            tenant_id: parent.tenant_id,
            pipeline_version_id: parent.pipeline_version_id,
            trigger_type: TriggerType::Retry,
            parameters: parameters_override.unwrap_or_else(|| parent.parameters.clone()),
            retry_of_run_id: Some(parent.id),
            root_run_id: Some(parent.root_run_id.unwrap_or(parent.id)),
        },
    )
    .await?;

    run_logs::insert_log(
        &mut tx,
        &NewRunLog {
            run_id: child.id,
            tenant_id: child.tenant_id,
            level: "INFO".to_owned(),
            message: format!("Retry of {}", parent.id),
            source: Some("control-plane".to_owned()),
            meta: Some(serde_json::json!({ "retry_of": parent.id })),
        },
    )
    .await?;

    tx.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(run_id = %child.id, retry_of = %parent.id, "retry queued");
    Ok(RetryOutcome {
        run: child,
        retry_of: parent.id,
    })
}
