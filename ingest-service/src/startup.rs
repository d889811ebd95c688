//! Application startup and lifecycle management.

use crate::config::IngestConfig;
use crate::handlers;
use crate::jobs::run_sync;
use crate::processors::Ingestor;
use crate::provider::UpClient;
use crate::services::metrics::init_metrics;
use crate::services::notifier;
use crate::services::store::{PgStore, Store};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: IngestConfig,
    pub ingestor: Ingestor,
    pub webhook_secret: Secret<String>,
}

impl AppState {
    pub fn new(config: IngestConfig, ingestor: Ingestor) -> Self {
        let webhook_secret = config.webhook.secret.clone();
        Self {
            config,
            ingestor,
            webhook_secret,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/webhook", post(handlers::receive_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Connect the store and wire up the client, notifier and processors.
pub async fn build_ingestor(
    config: &IngestConfig,
    run_migrations: bool,
) -> Result<Ingestor, AppError> {
    init_metrics();

    let store = PgStore::new(
        config.database.url.expose_secret(),
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to PostgreSQL");
        e
    })?;

    if run_migrations {
        store.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;
    }

    let store: Arc<dyn Store> = Arc::new(store);
    let notifier = notifier::from_config(&config.notifier);
    let client = UpClient::new(&config.up);

    Ok(Ingestor::new(client, store, notifier))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: IngestConfig, run_migrations: bool) -> Result<Self, AppError> {
        let ingestor = build_ingestor(&config, run_migrations).await?;
        Self::with_ingestor(config, ingestor).await
    }

    /// Build around an already wired ingestor.
    pub async fn with_ingestor(config: IngestConfig, ingestor: Ingestor) -> Result<Self, AppError> {
        let addr = config.common.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Ingest service listener bound");

        Ok(Self {
            port,
            listener,
            state: AppState::new(config, ingestor),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.state.ingestor
    }

    /// Serve HTTP and, when configured, the interval sync until the server stops.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let scheduler = self.state.config.sync.interval.map(|every| {
            tokio::spawn(run_scheduler(
                self.state.ingestor.clone(),
                every,
                self.state.config.sync.reconcile_concurrency,
            ))
        });

        tracing::info!(
            service = %self.state.config.service_name,
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            scheduled_sync = scheduler.is_some(),
            "Service ready to accept connections"
        );

        let router = build_router(self.state);
        let result = axum::serve(self.listener, router).await;

        if let Some(handle) = scheduler {
            handle.abort();
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

/// Run the sync job every `every`. Ticks that fall due while a run is in
/// progress are skipped, so at most one run is active.
async fn run_scheduler(ingestor: Ingestor, every: Duration, concurrency: usize) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; wait a full period instead.
    interval.tick().await;

    loop {
        interval.tick().await;
        tracing::info!("Scheduled sync starting");
        let report = run_sync(&ingestor, concurrency).await;
        tracing::info!(clean = report.is_clean(), report = ?report, "Scheduled sync finished");
    }
}
