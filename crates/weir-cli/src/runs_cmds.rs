//! Operator commands for inspecting and steering runs.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use weir_core::lifecycle::{self, RunSubmission};
use weir_core::liveness;
use weir_db::models::RunStatus;
use weir_db::queries::runs::{self, RunFilter};

use crate::RunsCommands;

pub async fn run_runs_command(command: RunsCommands, pool: &PgPool) -> Result<()> {
    match command {
        RunsCommands::List {
            tenant_id,
            status,
            limit,
            offset,
        } => cmd_list(pool, tenant_id, status, limit, offset).await,
        RunsCommands::Show { run_id } => cmd_show(pool, &run_id).await,
        RunsCommands::Submit {
            tenant_id,
            pipeline_version_id,
            parameters,
        } => cmd_submit(pool, &tenant_id, &pipeline_version_id, parameters.as_deref()).await,
        RunsCommands::Cancel { run_id } => cmd_cancel(pool, &run_id).await,
        RunsCommands::Retry { run_id } => cmd_retry(pool, &run_id).await,
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid ID: {raw}"))
}

async fn cmd_list(
    pool: &PgPool,
    tenant_id: Option<String>,
    status: Option<String>,
    limit: i64,
    offset: i64,
) -> Result<()> {
    let filter = RunFilter {
        tenant_id: tenant_id.as_deref().map(parse_id).transpose()?,
        status: status
            .as_deref()
            .map(|s| s.parse::<RunStatus>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("{e}"))?,
        retry_of_run_id: None,
    };

    let items = runs::list_runs(pool, &filter, limit.clamp(1, 100), offset.max(0)).await?;
    if items.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<9}  {:<7}  {:<19}  {}",
        "ID", "STATUS", "TRIGGER", "CREATED", "CLAIMED BY"
    );
    for run in &items {
        println!(
            "{:<36}  {:<9}  {:<7}  {:<19}  {}",
            run.id,
            run.status,
            run.trigger_type,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.claimed_by.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn cmd_show(pool: &PgPool, run_id: &str) -> Result<()> {
    let id = parse_id(run_id)?;
    let run = runs::get_run(pool, id)
        .await?
        .with_context(|| format!("run {id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

async fn cmd_submit(
    pool: &PgPool,
    tenant_id: &str,
    pipeline_version_id: &str,
    parameters: Option<&str>,
) -> Result<()> {
    let parameters = match parameters {
        Some(raw) => serde_json::from_str(raw).context("parameters must be a JSON object")?,
        None => serde_json::json!({}),
    };

    let run = lifecycle::submit(
        pool,
        RunSubmission {
            tenant_id: parse_id(tenant_id)?,
            pipeline_version_id: parse_id(pipeline_version_id)?,
            parameters,
        },
    )
    .await?;

    println!("Run {} queued.", run.id);
    Ok(())
}

async fn cmd_cancel(pool: &PgPool, run_id: &str) -> Result<()> {
    let run = lifecycle::cancel(pool, parse_id(run_id)?).await?;
    println!("Run {} cancelled.", run.id);
    Ok(())
}

async fn cmd_retry(pool: &PgPool, run_id: &str) -> Result<()> {
    let outcome = lifecycle::retry(pool, parse_id(run_id)?, None).await?;
    println!(
        "Run {} queued as retry of {}.",
        outcome.run.id, outcome.retry_of
    );
    Ok(())
}

/// Run one reaper sweep and report what it failed.
pub async fn cmd_reap_stale(pool: &PgPool, stale_after_seconds: i64, limit: i64) -> Result<()> {
    let report = liveness::reap_stale(pool, stale_after_seconds, limit).await?;
    if report.run_ids.is_empty() {
        println!("No stale runs.");
    } else {
        println!("Reaped {} run(s):", report.reaped());
        for id in &report.run_ids {
            println!("  {id}");
        }
    }
    Ok(())
}
