//! Configuration module for ingest-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

/// Up API default base URL.
pub const DEFAULT_UP_API_BASE_URL: &str = "https://api.up.com.au/api/v1";

/// Largest page the Up API will serve.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub up: UpConfig,
    pub webhook: WebhookConfig,
    pub notifier: NotifierConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct UpConfig {
    pub api_key: Secret<String>,
    pub base_url: String,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: Secret<String>,
}

/// Discord alert channel; both fields must be present for alerts to leave
/// the process.
#[derive(Debug, Clone, Default)]
pub struct NotifierConfig {
    pub discord_webhook_url: Option<String>,
    pub discord_user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// When set, `serve` also runs the sync job on this interval.
    pub interval: Option<Duration>,
    /// Upper bound on tags/categories reconciled at the same time.
    pub reconcile_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: None,
            reconcile_concurrency: 4,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "ingest-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: non_empty_var("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: Secret::new(required_var("DATABASE_URL")?),
                max_connections: parsed_var("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parsed_var("DATABASE_MIN_CONNECTIONS").unwrap_or(2),
            },
            up: UpConfig {
                api_key: Secret::new(required_var("UP_API_KEY")?),
                base_url: env::var("UP_API_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_UP_API_BASE_URL.to_string()),
                page_size: parsed_var("UP_PAGE_SIZE")
                    .unwrap_or(MAX_PAGE_SIZE)
                    .clamp(1, MAX_PAGE_SIZE),
            },
            webhook: WebhookConfig {
                secret: Secret::new(required_var("UP_WEBHOOK_SECRET")?),
            },
            notifier: NotifierConfig {
                discord_webhook_url: non_empty_var("DISCORD_WEBHOOK_URL"),
                discord_user_id: non_empty_var("DISCORD_USER_ID"),
            },
            sync: SyncConfig {
                interval: parsed_var::<u64>("SYNC_INTERVAL_SECS")
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
                reconcile_concurrency: parsed_var::<usize>("RECONCILE_CONCURRENCY")
                    .unwrap_or(4)
                    .max(1),
            },
        })
    }
}

fn required_var(key: &str) -> Result<String, AppError> {
    non_empty_var(key)
        .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("{} is required", key)))
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
