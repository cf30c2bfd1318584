//! Run state machine.
//!
//! Declares the legal transition graph for a run and classifies conflicts
//! after a guarded UPDATE affects zero rows. The graph itself is enforced
//! in SQL (every mutation's WHERE clause names the states it may leave
//! from); this module is the single place that graph is written down.

use weir_db::models::RunStatus;

/// The run state machine.
///
/// ```text
/// QUEUED  -> RUNNING    (claim)
/// QUEUED  -> CANCELLED  (cancel before dispatch)
/// RUNNING -> SUCCEEDED  (complete)
/// RUNNING -> FAILED     (complete, or reap on heartbeat timeout)
/// RUNNING -> CANCELLED  (cancel)
/// ```
///
/// Terminal states (SUCCEEDED, FAILED, CANCELLED) absorb every event.
/// Retry does not transition the parent -- it creates a fresh QUEUED run
/// linked through `retry_of_run_id`.
pub struct RunStateMachine;

impl RunStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in
    /// the state graph.
    pub fn is_valid_transition(from: RunStatus, to: RunStatus) -> bool {
        matches!(
            (from, to),
            (RunStatus::Queued, RunStatus::Running)
                | (RunStatus::Queued, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Succeeded)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }

    /// Whether a run in `status` may still be cancelled.
    pub fn is_cancellable(status: RunStatus) -> bool {
        Self::is_valid_transition(status, RunStatus::Cancelled)
    }

    /// Whether a run in `status` may be retried (a new child run created).
    /// Only failed and cancelled runs have something to retry.
    pub fn is_retryable(status: RunStatus) -> bool {
        matches!(status, RunStatus::Failed | RunStatus::Cancelled)
    }
}
