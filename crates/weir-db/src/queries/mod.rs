//! Query functions, one module per table family.
//!
//! Convention: single-statement functions take `&PgPool`; functions that
//! must run inside a caller-owned transaction (the claim and reap paths,
//! and log inserts that ride along with them) take `&mut PgConnection`.

pub mod catalog;
pub mod run_logs;
pub mod runs;
