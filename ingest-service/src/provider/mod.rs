//! Up banking API client.

pub mod paginator;
pub mod resources;

use crate::config::UpConfig;
use crate::services::metrics::record_upstream_request;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub use paginator::{walk, walk_from, Collector, PageHandler};

/// Remaining request quota reported on every response.
pub const RATE_LIMIT_HEADER: &str = "x-rate-limit-remaining";

/// Header carrying the HMAC-SHA256 of a webhook body.
pub const AUTHENTICITY_HEADER: &str = "x-up-authenticity-signature";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Rate limit exceeded ({0})")]
    RateLimited(String),

    #[error("Upstream returned {status} for {url}")]
    Http { status: StatusCode, url: String },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Request to upstream failed: {0}")]
    Network(String),

    #[error("Invalid upstream link: {0}")]
    InvalidLink(String),
}

impl ProviderError {
    fn outcome(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Http { .. } => "http_error",
            Self::Decode { .. } => "decode_error",
            Self::Network(_) => "network_error",
            Self::InvalidLink(_) => "invalid_link",
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited(_) => AppError::TooManyRequests(err.to_string(), None),
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

/// Authenticated client for the Up API.
#[derive(Clone)]
pub struct UpClient {
    client: Client,
    api_key: Secret<String>,
    base_url: String,
    page_size: u32,
}

impl UpClient {
    pub fn new(config: &UpConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// First-page link for a listing, e.g. `listing_url("/tags", &[])`.
    pub fn listing_url(
        &self,
        path: &str,
        filters: &[(&str, &str)],
    ) -> Result<String, ProviderError> {
        let page_size = self.page_size.to_string();
        let params = std::iter::once(("page[size]", page_size.as_str()))
            .chain(filters.iter().copied());

        Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map(|url| url.to_string())
            .map_err(|e| ProviderError::InvalidLink(format!("{}: {}", path, e)))
    }

    /// Canonical link for a single transaction.
    pub fn transaction_url(&self, provider_id: &str) -> String {
        format!("{}/transactions/{}", self.base_url, provider_id)
    }

    /// Fetch and decode one document.
    ///
    /// Aborts when the quota header reads zero, on any non-success status, and
    /// when the body does not decode as `T`. Nothing is retried.
    #[instrument(skip(self), fields(url = %link))]
    pub async fn get<T: DeserializeOwned>(&self, link: &str) -> Result<T, ProviderError> {
        let result = self.fetch(link).await;
        match &result {
            Ok(_) => record_upstream_request("ok"),
            Err(e) => record_upstream_request(e.outcome()),
        }
        result
    }

    async fn fetch<T: DeserializeOwned>(&self, link: &str) -> Result<T, ProviderError> {
        let url = self.resolve(link)?;

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let remaining = response
            .headers()
            .get(RATE_LIMIT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if remaining == Some(0) {
            warn!(url = %url, "Upstream rate limit exhausted");
            return Err(ProviderError::RateLimited(url.to_string()));
        }

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http {
                status,
                url: url.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        debug!(bytes = bytes.len(), remaining = ?remaining, "Upstream response received");

        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Absolute links are used as-is; anything else is joined to the base URL.
    fn resolve(&self, link: &str) -> Result<Url, ProviderError> {
        let absolute = if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.base_url, link.trim_start_matches('/'))
        };
        Url::parse(&absolute).map_err(|e| ProviderError::InvalidLink(format!("{}: {}", link, e)))
    }
}
