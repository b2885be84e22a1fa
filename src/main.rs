//! kv-runner - manage key-value server instances on one host.
//!
//! `kv-runner serve` runs the daemon: it reconciles records with the
//! instance directories, starts the instances that are wanted running and
//! serves the HTTP API. The other subcommands run one operation and print
//! the result as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kv_runner::store::SqliteRepository;
use kv_runner::{Config, KvRunner, ReconcileScheduler};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kv-runner")]
#[command(version)]
#[command(about = "Run and supervise key-value server instances")]
struct Cli {
    /// JSON configuration file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon and the HTTP API (default)
    Serve,
    /// Create an instance
    ///
    /// Examples:
    ///   kv-runner create cache             # First free port of the range
    ///   kv-runner create cache --port 6400 # Explicit port
    Create {
        /// Instance id
        id: String,
        /// Port to use instead of the first free one
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Start an instance
    Start {
        /// Instance id
        id: String,
    },
    /// Stop an instance
    Stop {
        /// Instance id
        id: String,
    },
    /// Stop an instance and delete its files and record
    Delete {
        /// Instance id
        id: String,
    },
    /// Show the live status of an instance
    Status {
        /// Instance id
        id: String,
    },
    /// List all instances
    List,
    /// Bring records in line with the instance directories
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let repository = SqliteRepository::open(&config.database_path).with_context(|| {
        format!("opening database {}", config.database_path.display())
    })?;
    let runner = KvRunner::new(config, Arc::new(repository))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(runner).await,
        Commands::Create { id, port } => print_json(&runner.create_with_port(&id, port).await?),
        Commands::Start { id } => print_json(&runner.start(&id).await?),
        Commands::Stop { id } => print_json(&runner.stop(&id).await?),
        Commands::Delete { id } => {
            runner.delete(&id).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
        Commands::Status { id } => print_json(&runner.status(&id).await?),
        Commands::List => print_json(&runner.list().await?),
        Commands::Reconcile => print_json(&runner.reconcile().await?),
    }
}

async fn serve(runner: KvRunner) -> Result<()> {
    let report = runner.reconcile().await.context("initial reconciliation")?;
    tracing::info!(
        removed = report.removed.len(),
        adopted = report.adopted.len(),
        realigned = report.realigned.len(),
        skipped = report.skipped.len(),
        "Initial reconciliation finished"
    );

    let starter = runner.clone();
    tokio::spawn(async move {
        match starter.start_all_desired().await {
            Ok(report) => tracing::info!(
                started = report.started.len(),
                failed = report.failed.len(),
                "Desired instances started"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to start desired instances"),
        }
    });

    let mut scheduler = runner
        .config()
        .sync_interval()
        .map(|period| ReconcileScheduler::new(runner.clone(), period));
    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.start()?;
    }

    let server = kv_runner::http::serve(runner.clone(), &runner.config().http)?;
    let handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown requested");

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.stop()?;
    }
    handle.stop(true).await;
    server_task.await??;

    tracing::info!("kv-runner stopped");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
