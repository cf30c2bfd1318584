//! Liveness tracker: heartbeats and the reaper.
//!
//! Workers prove they are alive by refreshing `heartbeat_at` on the run
//! they hold. The reaper is the inverse: an admin-triggered sweep that
//! fails RUNNING runs whose heartbeat has aged past a threshold. Reaping
//! is deliberately not a background timer thread -- the host environment
//! invokes it on its own tick so timing stays observable and testable.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use weir_db::models::RunStatus;
use weir_db::queries::run_logs::{self, NewRunLog};
use weir_db::queries::runs;

use crate::error::{EngineError, EngineResult};

/// Reap input clamps: a threshold below one second is meaningless, and a
/// single sweep never touches more than 500 rows.
const MIN_STALE_AFTER_SECONDS: i64 = 1;
const MAX_REAP_LIMIT: i64 = 500;

/// Outcome of one reaper sweep.
#[derive(Debug, Clone, Default)]
pub struct ReapReport {
    pub run_ids: Vec<Uuid>,
}

impl ReapReport {
    pub fn reaped(&self) -> usize {
        self.run_ids.len()
    }
}

/// Record a heartbeat from `worker_id` for a RUNNING run it holds.
///
/// Returns the new heartbeat timestamp. Rejects heartbeats for missing
/// runs, runs not in RUNNING (including reaped ones -- the worker learns
/// the truth on its next complete), and runs claimed by a different
/// worker.
pub async fn heartbeat(
    pool: &PgPool,
    run_id: Uuid,
    worker_id: &str,
) -> EngineResult<DateTime<Utc>> {
    // Classify before mutating so the caller gets a precise reason.
    let run = runs::get_run(pool, run_id)
        .await?
        .ok_or(EngineError::RunNotFound)?;

    if run.status != RunStatus::Running {
        return Err(EngineError::InvalidState { status: run.status });
    }
    if run.claimed_by.as_deref() != Some(worker_id) {
        return Err(EngineError::WorkerMismatch {
            claimed_by: run.claimed_by,
        });
    }

    // The UPDATE re-checks both predicates, so a reap or cancel that lands
    // between the read above and here loses us the row instead of racing.
    match runs::touch_heartbeat(pool, run_id, worker_id).await? {
        Some(ts) => Ok(ts),
        None => {
            // Lost the race; re-read and classify.
            let run = runs::get_run(pool, run_id)
                .await?
                .ok_or(EngineError::RunNotFound)?;
            if run.status != RunStatus::Running {
                Err(EngineError::InvalidState { status: run.status })
            } else {
                Err(EngineError::WorkerMismatch {
                    claimed_by: run.claimed_by,
                })
            }
        }
    }
}

/// Fail every RUNNING run whose heartbeat is older than
/// `stale_after_seconds` (or missing entirely), up to `limit` rows.
///
/// Inputs are clamped (`stale_after_seconds >= 1`, `1 <= limit <= 500`).
/// Each reaped run gets `error_message = "Stale: no heartbeat for Ns"` and
/// a WARN log entry from the control plane, all in one transaction.
pub async fn reap_stale(
    pool: &PgPool,
    stale_after_seconds: i64,
    limit: i64,
) -> EngineResult<ReapReport> {
    let stale_after_seconds = stale_after_seconds.max(MIN_STALE_AFTER_SECONDS);
    let limit = limit.clamp(1, MAX_REAP_LIMIT);

    let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;

    let stale = runs::select_stale_running(&mut tx, stale_after_seconds, limit).await?;

    let error_message = format!("Stale: no heartbeat for {stale_after_seconds}s");
    let mut report = ReapReport::default();

    for row in &stale {
        runs::mark_stale_failed(&mut tx, row.id, &error_message).await?;

        let mut meta = serde_json::json!({ "stale_after_seconds": stale_after_seconds });
        if let Some(last) = row.heartbeat_at {
            meta["last_heartbeat_at"] = serde_json::json!(last);
        }
        run_logs::insert_log(
            &mut tx,
            &NewRunLog {
                run_id: row.id,
                tenant_id: row.tenant_id,
                level: "WARN".to_owned(),
                message: "Run marked stale by reaper".to_owned(),
                source: Some("control-plane".to_owned()),
                meta: Some(meta),
            },
        )
        .await?;

        report.run_ids.push(row.id);
    }

    tx.commit().await.map_err(anyhow::Error::from)?;

    if !report.run_ids.is_empty() {
        tracing::warn!(
            reaped = report.reaped(),
            stale_after_seconds,
            "reaper failed stale runs"
        );
    }

    Ok(report)
}
