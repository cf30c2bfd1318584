//! Connection pool and schema bootstrap.
//!
//! weir owns exactly five tables: the catalog trio (`tenants`,
//! `pipelines`, `pipeline_versions`) and the run engine pair
//! (`pipeline_runs`, `pipeline_run_logs`). Bootstrap is
//! [`create_database_if_missing`] followed by [`apply_migrations`], both
//! driven by `weir db-init`; re-running either is harmless.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Connection URL used when neither CLI flag, env var, nor config file
/// names one.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost:5432/weir";

/// Open a pool against the weir database.
///
/// Sized for the control plane's workload: claim/reap transactions are
/// single-digit milliseconds, so a small pool goes a long way even under
/// many concurrent workers.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .with_context(|| format!("failed to connect to database at {database_url}"))?;
    Ok(pool)
}

/// Split a connection URL into its server half and database name.
///
/// `postgresql://host:5432/weir` becomes
/// `("postgresql://host:5432", "weir")`. The name is validated as a plain
/// identifier because it gets spliced into `CREATE DATABASE`, which cannot
/// take a bind parameter.
fn split_database_url(database_url: &str) -> Result<(&str, &str)> {
    let (server, name) = database_url
        .rsplit_once('/')
        .with_context(|| format!("database URL {database_url:?} has no path component"))?;
    if name.is_empty() {
        anyhow::bail!("database URL {database_url:?} names no database");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        anyhow::bail!("database name {name:?} contains invalid characters");
    }
    Ok((server, name))
}

/// Create the weir database if it does not exist yet.
///
/// Runs `CREATE DATABASE` through the server's `postgres` maintenance
/// database. An existing database is left untouched, so `weir db-init`
/// can be re-run against a live deployment.
pub async fn create_database_if_missing(database_url: &str) -> Result<()> {
    let (server, name) = split_database_url(database_url)?;
    let maintenance_url = format!("{server}/postgres");

    let maint = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&maintenance_url)
        .await
        .with_context(|| {
            format!("failed to connect to maintenance database at {maintenance_url}")
        })?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(&maint)
            .await
            .context("failed to query pg_database")?;

    if exists {
        info!(db = name, "database already exists");
    } else {
        // The name was validated by split_database_url.
        maint
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .with_context(|| format!("failed to create database {name}"))?;
        info!(db = name, "database created");
    }

    maint.close().await;
    Ok(())
}

/// Apply the schema migrations shipped under `weir-db/migrations/`.
///
/// Migrations are loaded at runtime through `sqlx::migrate::Migrator`, so
/// building the workspace never needs a live database. sqlx's
/// `_sqlx_migrations` ledger skips anything already applied.
pub async fn apply_migrations(pool: &PgPool, migrations_dir: &Path) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .with_context(|| {
            format!(
                "failed to load migrations from {}",
                migrations_dir.display()
            )
        })?;

    migrator
        .run(pool)
        .await
        .context("failed to apply schema migrations")?;

    info!("schema is up to date");
    Ok(())
}

/// The migrations directory inside the `weir-db` crate's source tree.
///
/// Resolved from `CARGO_MANIFEST_DIR` at compile time. Installed binaries
/// shipped without the source tree must embed the migrations themselves.
pub fn default_migrations_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
}

/// Row counts for weir's five tables, in dependency order.
#[derive(Debug, Clone, Default)]
pub struct SchemaCounts {
    pub tenants: i64,
    pub pipelines: i64,
    pub pipeline_versions: i64,
    pub pipeline_runs: i64,
    pub pipeline_run_logs: i64,
}

impl SchemaCounts {
    /// (table name, row count) pairs for display.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, i64)> {
        [
            ("tenants", self.tenants),
            ("pipelines", self.pipelines),
            ("pipeline_versions", self.pipeline_versions),
            ("pipeline_runs", self.pipeline_runs),
            ("pipeline_run_logs", self.pipeline_run_logs),
        ]
        .into_iter()
    }
}

/// Count the rows in each of weir's tables.
///
/// `weir db-init` prints this as its success summary; it doubles as a
/// cheap "schema is really there" probe.
pub async fn schema_counts(pool: &PgPool) -> Result<SchemaCounts> {
    async fn count(pool: &PgPool, table: &str) -> Result<i64> {
        // Table names come from the fixed list below, never from input.
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        Ok(n)
    }

    Ok(SchemaCounts {
        tenants: count(pool, "tenants").await?,
        pipelines: count(pool, "pipelines").await?,
        pipeline_versions: count(pool, "pipeline_versions").await?,
        pipeline_runs: count(pool, "pipeline_runs").await?,
        pipeline_run_logs: count(pool, "pipeline_run_logs").await?,
    })
}
