mod config;
mod runs_cmds;
mod serve_cmd;
mod worker_cmd;

use clap::{Parser, Subcommand};

use weir_db::pool;

use config::WeirConfig;

#[derive(Parser)]
#[command(name = "weir", about = "Multi-tenant control plane for pipeline runs")]
struct Cli {
    /// Database URL (overrides WEIR_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a weir config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/weir")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the weir database (create + migrate)
    DbInit,
    /// Run the control-plane HTTP server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Run a simulated data-plane worker
    Worker {
        /// Worker identity (defaults to worker-<pid>)
        #[arg(long)]
        worker_id: Option<String>,
        /// Only claim runs for this tenant
        #[arg(long)]
        tenant_id: Option<uuid::Uuid>,
        /// Sleep between empty polls, in milliseconds
        #[arg(long, default_value_t = 1500)]
        poll_ms: u64,
        /// Heartbeat interval, in seconds
        #[arg(long, default_value_t = 30)]
        heartbeat_secs: u64,
        /// Simulated execution time per run, in milliseconds
        #[arg(long, default_value_t = 500)]
        work_ms: u64,
        /// Exit after the first claim attempt
        #[arg(long)]
        once: bool,
    },
    /// Fail RUNNING runs whose heartbeat has gone stale
    ReapStale {
        /// Heartbeat age threshold in seconds
        #[arg(long, default_value_t = 300)]
        stale_after_seconds: i64,
        /// Maximum runs to reap in one sweep
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Run management
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
}

#[derive(Subcommand)]
pub enum RunsCommands {
    /// List runs, newest first
    List {
        /// Filter by tenant ID
        #[arg(long)]
        tenant_id: Option<String>,
        /// Filter by status (QUEUED, RUNNING, SUCCEEDED, FAILED, CANCELLED)
        #[arg(long)]
        status: Option<String>,
        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Show one run as JSON
    Show {
        /// Run ID to show
        run_id: String,
    },
    /// Queue a new run for an APPROVED pipeline version
    Submit {
        /// Tenant ID
        #[arg(long)]
        tenant_id: String,
        /// Pipeline version ID (must be APPROVED)
        #[arg(long)]
        pipeline_version_id: String,
        /// Run parameters as a JSON object
        #[arg(long)]
        parameters: Option<String>,
    },
    /// Cancel a QUEUED or RUNNING run
    Cancel {
        /// Run ID to cancel
        run_id: String,
    },
    /// Queue a retry of a FAILED or CANCELLED run
    Retry {
        /// Run ID to retry
        run_id: String,
    },
}

/// Execute the `weir init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        server: config::ServerSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `weir db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `weir db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = WeirConfig::resolve(cli_db_url)?;

    println!("Initializing weir database...");

    // 1. Create the database if it does not exist.
    pool::create_database_if_missing(&resolved.database_url).await?;

    // 2. Connect to the target database.
    let db_pool = pool::connect(&resolved.database_url).await?;

    // 3. Apply migrations.
    pool::apply_migrations(&db_pool, pool::default_migrations_path()).await?;

    // 4. Print success with per-table counts.
    let counts = pool::schema_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in counts.iter() {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("weir db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = WeirConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::connect(&resolved.database_url).await?;
            let result =
                serve_cmd::run_serve(db_pool.clone(), &bind, port, &resolved.cors_origins).await;
            db_pool.close().await;
            result?;
        }
        Commands::Worker {
            worker_id,
            tenant_id,
            poll_ms,
            heartbeat_secs,
            work_ms,
            once,
        } => {
            let resolved = WeirConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::connect(&resolved.database_url).await?;
            let opts = worker_cmd::WorkerOptions {
                worker_id: worker_id.unwrap_or_else(worker_cmd::WorkerOptions::default_worker_id),
                tenant_id,
                poll_ms,
                heartbeat_secs,
                work_ms,
                once,
            };
            let result = worker_cmd::run_worker(&db_pool, &opts).await;
            db_pool.close().await;
            result?;
        }
        Commands::ReapStale {
            stale_after_seconds,
            limit,
        } => {
            let resolved = WeirConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::connect(&resolved.database_url).await?;
            let result = runs_cmds::cmd_reap_stale(&db_pool, stale_after_seconds, limit).await;
            db_pool.close().await;
            result?;
        }
        Commands::Runs { command } => {
            let resolved = WeirConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::connect(&resolved.database_url).await?;
            let result = runs_cmds::run_runs_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------
