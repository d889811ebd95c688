//! Alert sinks.

use crate::config::NotifierConfig;
use crate::services::metrics::record_alert;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;

/// Discord message flag that suppresses push notifications.
const SUPPRESS_NOTIFICATIONS: u32 = 1 << 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warn,
    Error,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort delivery; failures are logged by the implementation.
    async fn deliver(&self, level: AlertLevel, message: &str);

    /// Raise an alert. `Warn` always succeeds; `Error` always fails once
    /// delivery has been attempted.
    async fn notify(&self, level: AlertLevel, message: &str) -> Result<(), AppError> {
        record_alert(level.as_str());
        match level {
            AlertLevel::Warn => tracing::warn!(alert = %message, "Alert raised"),
            AlertLevel::Error => tracing::error!(alert = %message, "Alert raised"),
        }

        self.deliver(level, message).await;

        match level {
            AlertLevel::Warn => Ok(()),
            AlertLevel::Error => Err(AppError::InternalError(anyhow::anyhow!(
                "{}",
                message
            ))),
        }
    }

    /// Raise an error-level alert and hand back the resulting error.
    async fn fail(&self, message: &str) -> AppError {
        match self.notify(AlertLevel::Error, message).await {
            Err(e) => e,
            Ok(()) => AppError::InternalError(anyhow::anyhow!("{}", message)),
        }
    }
}

/// Build the notifier described by `config`: Discord when both the webhook URL
/// and user id are set, log-only otherwise.
pub fn from_config(config: &NotifierConfig) -> Arc<dyn Notifier> {
    match (&config.discord_webhook_url, &config.discord_user_id) {
        (Some(url), Some(user_id)) => Arc::new(DiscordNotifier::new(url, user_id)),
        _ => {
            tracing::info!("Discord alerting not configured - alerts will only be logged");
            Arc::new(LogNotifier)
        }
    }
}

/// Alerts go to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, _level: AlertLevel, _message: &str) {}
}

#[derive(Debug, Serialize)]
struct DiscordPayload {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u32>,
}

pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
    user_id: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: &str, user_id: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            webhook_url: webhook_url.to_string(),
            user_id: user_id.to_string(),
        }
    }

    fn payload(&self, level: AlertLevel, message: &str) -> DiscordPayload {
        match level {
            AlertLevel::Error => DiscordPayload {
                content: format!("<@{}> {}", self.user_id, message),
                flags: Some(SUPPRESS_NOTIFICATIONS),
            },
            AlertLevel::Warn => DiscordPayload {
                content: message.to_string(),
                flags: None,
            },
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn deliver(&self, level: AlertLevel, message: &str) {
        let payload = self.payload(level, message);

        match self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(level = level.as_str(), "Discord alert delivered");
            }
            Ok(response) => {
                tracing::error!(
                    status = %response.status(),
                    "Failed to send Discord webhook alert"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send Discord webhook alert");
            }
        }
    }
}
