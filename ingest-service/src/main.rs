//! Ingest Service entry point.

use clap::{Parser, Subcommand};
use ingest_service::config::IngestConfig;
use ingest_service::jobs::{run_load, run_sync};
use ingest_service::startup::{build_ingestor, Application};
use service_core::observability::init_tracing;
use std::process::ExitCode;
use tokio::signal;

#[derive(Parser)]
#[command(
    name = "ingest-service",
    version,
    about = "Up banking ingestion, webhook handling and reconciliation"
)]
struct Cli {
    /// Skip database migrations at startup
    #[arg(long, global = true)]
    skip_migrations: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Serve the webhook endpoint, health checks and metrics (default)
    Serve,
    /// Reconcile tags and tag/category associations once, then exit
    Sync,
    /// Ingest accounts, categories, tags and transactions once, then exit
    Load,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match IngestConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let command = cli.command.unwrap_or(Command::Serve);
    let run_migrations = !cli.skip_migrations;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service_name = %config.service_name,
        http_addr = %config.common.socket_addr(),
        up_base_url = %config.up.base_url,
        page_size = config.up.page_size,
        db_max_connections = config.database.max_connections,
        db_min_connections = config.database.min_connections,
        sync_interval_secs = ?config.sync.interval.map(|d| d.as_secs()),
        "Configuration loaded"
    );

    match command {
        Command::Serve => serve(config, run_migrations).await,
        Command::Sync => {
            let ingestor = match build_ingestor(&config, run_migrations).await {
                Ok(ingestor) => ingestor,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build ingestor");
                    return ExitCode::FAILURE;
                }
            };
            let report = run_sync(&ingestor, config.sync.reconcile_concurrency).await;
            tracing::info!(report = ?report, clean = report.is_clean(), "Sync complete");
            exit_code(report.is_clean())
        }
        Command::Load => {
            let ingestor = match build_ingestor(&config, run_migrations).await {
                Ok(ingestor) => ingestor,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build ingestor");
                    return ExitCode::FAILURE;
                }
            };
            let report = run_load(&ingestor).await;
            tracing::info!(failed = ?report.failed, clean = report.is_clean(), "Load complete");
            exit_code(report.is_clean())
        }
    }
}

/// One-shot jobs exit non-zero when any stage failed at its boundary.
fn exit_code(clean: bool) -> ExitCode {
    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn serve(config: IngestConfig, run_migrations: bool) -> ExitCode {
    let app = match Application::build(config, run_migrations).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build application");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        result = app.run_until_stopped() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Application error");
                return ExitCode::FAILURE;
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Graceful shutdown initiated");
        }
    }

    tracing::info!("Service shutdown complete");
    ExitCode::SUCCESS
}
