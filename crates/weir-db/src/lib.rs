//! Persistence layer for the weir control plane.
//!
//! Owns the schema (SQL migrations under `migrations/`), the row models,
//! pool construction and bootstrap, and the query functions. No lifecycle
//! policy lives here -- state-machine rules and the claim/reap/cancel
//! protocols are enforced by `weir-core` on top of these building blocks.

pub mod models;
pub mod pool;
pub mod queries;
