//! Engine error taxonomy.
//!
//! Conflicts and not-founds are values, not panics: the HTTP layer maps
//! each variant to its status code and JSON envelope. Database failures
//! pass through as `Db` and surface as server errors.

use uuid::Uuid;

use weir_db::models::RunStatus;

/// Errors produced by the run lifecycle engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The referenced run does not exist.
    #[error("run not found")]
    RunNotFound,

    /// The operation is illegal in the run's current state.
    #[error("operation not allowed while run is {status}")]
    InvalidState { status: RunStatus },

    /// A heartbeat arrived from a worker that does not hold the claim.
    #[error("run is claimed by {claimed_by:?}, not the caller")]
    WorkerMismatch { claimed_by: Option<String> },

    /// The referenced pipeline version does not exist.
    #[error("pipeline version not found")]
    VersionNotFound,

    /// The referenced pipeline version is not APPROVED.
    #[error("pipeline version is not APPROVED")]
    VersionNotApproved,

    /// A claimed run's pipeline version disappeared between enqueue and
    /// claim. The claim transaction rolls back.
    #[error("pipeline version not found for claimed run {run_id}")]
    VersionVanished { run_id: Uuid },

    /// Database or connection failure.
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
