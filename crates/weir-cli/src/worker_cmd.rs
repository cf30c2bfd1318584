//! Simulated data-plane worker.
//!
//! Reference client of the run lifecycle engine: claims QUEUED runs,
//! heartbeats while "executing" the DAG (a timed sleep stands in for real
//! work), appends progress logs, and completes. A conflict on complete
//! means the control plane cancelled or reaped the run -- the worker gives
//! up on it and moves on.

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use weir_core::dispatch::{self, ClaimedRun};
use weir_core::error::EngineError;
use weir_core::lifecycle::{self, CompletionStatus};
use weir_core::liveness;
use weir_core::logs::{self, NewLogEntry};

/// Worker loop options, resolved from CLI flags.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    /// Restrict claims to one tenant.
    pub tenant_id: Option<Uuid>,
    /// Sleep between empty polls.
    pub poll_ms: u64,
    /// Heartbeat interval; keep well under the reap threshold.
    pub heartbeat_secs: u64,
    /// Simulated execution time per run.
    pub work_ms: u64,
    /// Exit after the first claim attempt (drain-one mode).
    pub once: bool,
}

impl WorkerOptions {
    pub fn default_worker_id() -> String {
        format!("worker-{}", std::process::id())
    }
}

/// Run the polling loop until ctrl-c (or after one attempt with `--once`).
pub async fn run_worker(pool: &PgPool, opts: &WorkerOptions) -> Result<()> {
    tracing::info!(worker_id = %opts.worker_id, "worker started");

    loop {
        let claimed = tokio::select! {
            c = dispatch::claim(pool, &opts.worker_id, opts.tenant_id) => c?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("worker shutting down");
                return Ok(());
            }
        };

        match claimed {
            Some(claimed) => {
                execute_run(pool, opts, &claimed).await?;
                if opts.once {
                    return Ok(());
                }
            }
            None => {
                if opts.once {
                    tracing::info!("no queued runs");
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(opts.poll_ms)).await;
            }
        }
    }
}

/// Drive one claimed run to completion, heartbeating along the way.
async fn execute_run(pool: &PgPool, opts: &WorkerOptions, claimed: &ClaimedRun) -> Result<()> {
    let run_id = claimed.run.id;
    tracing::info!(run_id = %run_id, "executing run");

    append_best_effort(
        pool,
        run_id,
        "INFO",
        format!("Claimed run {run_id}"),
        serde_json::json!({ "worker_id": opts.worker_id }),
    )
    .await;
    append_best_effort(
        pool,
        run_id,
        "INFO",
        "Run began executing".to_owned(),
        serde_json::json!({ "step": "execute", "dag_spec": claimed.pipeline_version.dag_spec.clone() }),
    )
    .await;

    // Simulated DAG execution: sleep for work_ms, heartbeating on the side.
    let mut ticker = tokio::time::interval(Duration::from_secs(opts.heartbeat_secs.max(1)));
    let work = tokio::time::sleep(Duration::from_millis(opts.work_ms));
    tokio::pin!(work);

    loop {
        tokio::select! {
            _ = &mut work => break,
            _ = ticker.tick() => {
                match liveness::heartbeat(pool, run_id, &opts.worker_id).await {
                    Ok(_) => {}
                    Err(EngineError::InvalidState { status }) => {
                        // Cancelled or reaped under us; stop working on it.
                        tracing::warn!(run_id = %run_id, %status, "run no longer RUNNING, abandoning");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    append_best_effort(
        pool,
        run_id,
        "INFO",
        "Simulated work finished".to_owned(),
        serde_json::json!({ "step": "simulate" }),
    )
    .await;

    match lifecycle::complete(pool, run_id, CompletionStatus::Succeeded, None).await {
        Ok(run) => {
            append_best_effort(
                pool,
                run_id,
                "INFO",
                "Run completed successfully".to_owned(),
                serde_json::json!({ "status": run.status }),
            )
            .await;
            tracing::info!(run_id = %run_id, "run succeeded");
        }
        Err(EngineError::InvalidState { status }) => {
            // Terminal "give up" signal: someone else finished the run.
            tracing::warn!(run_id = %run_id, %status, "complete conflicted, giving up");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Append a worker log entry; failures are logged and swallowed.
async fn append_best_effort(
    pool: &PgPool,
    run_id: Uuid,
    level: &str,
    message: String,
    meta: serde_json::Value,
) {
    let entry = NewLogEntry {
        level: level.to_owned(),
        message,
        source: Some("worker".to_owned()),
        meta: Some(meta),
    };
    if let Err(e) = logs::append(pool, run_id, entry).await {
        tracing::warn!(run_id = %run_id, error = %e, "failed to append worker log (best-effort)");
    }
}
