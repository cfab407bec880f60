//! tripmesh-ingest - trip ingestion service
//!
//! `serve` (default) runs the HTTP service; `ingest <file>` runs one
//! ingestion job in the foreground and prints its progress.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tripmesh_common::config::{CliOverrides, ServiceConfig};
use tripmesh_ingest::{build_router, db, AppState};

/// Command-line arguments for tripmesh-ingest
#[derive(Parser, Debug)]
#[command(name = "tripmesh-ingest")]
#[command(about = "Trip ingestion and grouping service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Rows per batch transaction
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// HTTP listen address
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Directory for CSV files uploaded over HTTP
    #[arg(long, global = true)]
    upload_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Ingest one CSV file in the foreground
    Ingest {
        /// Source CSV file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let overrides = CliOverrides {
        config_path: args.config.clone(),
        database: args.database.clone(),
        bind: args.bind.clone(),
        upload_dir: args.upload_dir.clone(),
        chunk_size: args.chunk_size,
    };
    let config = ServiceConfig::resolve(&overrides).context("Invalid configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "Starting tripmesh-ingest v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Database: {}", config.database_path.display());

    let pool = db::init_database_pool(&config.database_path)
        .await
        .context("Failed to open database")?;

    let command = args.command.unwrap_or(Command::Serve);

    // Jobs left unfinished by a previous service process. A foreground
    // ingest may share the database with a live service, so it skips this.
    if matches!(command, Command::Serve) {
        let interrupted = {
            let mut conn = pool.acquire().await?;
            db::jobs::fail_interrupted_jobs(&mut conn).await?
        };
        if interrupted > 0 {
            warn!(count = interrupted, "Marked interrupted ingestion jobs as failed");
        }
    }

    let state = AppState::start(
        pool,
        config.ingest.clone(),
        config.event_capacity,
        config.upload_dir.clone(),
    );

    match command {
        Command::Serve => serve(state, &config.bind).await,
        Command::Ingest { file } => ingest_foreground(state, file).await,
    }
}

async fn serve(state: AppState, bind: &str) -> Result<()> {
    info!("Upload directory: {}", state.upload_dir.display());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn ingest_foreground(state: AppState, file: PathBuf) -> Result<()> {
    let service = state.ingestion.clone();
    let job = service.create_job(&file).await?;
    let mut subscription = state.registry.subscribe(job.id);

    let printer = tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            match message.total_rows {
                Some(total) => println!("{}: {}/{} rows", message.status, message.processed_rows, total),
                None => println!("{}: {} rows", message.status, message.processed_rows),
            }
            if let Some(text) = &message.message {
                println!("  {}", text);
            }
            if message.status.is_terminal() {
                break;
            }
        }
    });

    let outcome = service.run_job(job.id, file).await;
    if let Err(e) = printer.await {
        warn!("Progress printer task failed: {}", e);
    }

    let summary = outcome.with_context(|| format!("Job {} failed", job.id))?;
    println!(
        "Job {} completed: {} rows in {} batches",
        summary.job_id, summary.processed_rows, summary.batches
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
