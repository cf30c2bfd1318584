//! The run lifecycle engine.
//!
//! Everything that governs a [`weir_db::models::PipelineRun`] lives here:
//! the state machine, the atomic claim protocol, heartbeat tracking and
//! reaping, the complete/cancel/retry controller, and the per-run log
//! stream. The database is the only coordination primitive -- there is no
//! in-process registry of runs, and every invariant is enforced by an
//! UPDATE's WHERE clause or a row lock held for the span of one short
//! transaction.

pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod logs;
pub mod state;

pub use error::{EngineError, EngineResult};
