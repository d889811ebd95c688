//! Common test utilities for ingest-service integration tests.

#![allow(dead_code)]

mod memory_store;

pub use memory_store::{MemoryStore, WriteFault};

use async_trait::async_trait;
use ingest_service::config::{
    DatabaseConfig, IngestConfig, NotifierConfig, SyncConfig, UpConfig, WebhookConfig,
};
use ingest_service::processors::Ingestor;
use ingest_service::provider::UpClient;
use ingest_service::services::notifier::{AlertLevel, Notifier};
use ingest_service::services::store::Store;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Mutex, Once};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const WEBHOOK_SECRET: &str = "webhook-test-secret";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ingest_service=debug,wiremock=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Notifier that keeps every alert for later assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<(AlertLevel, String)>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<(AlertLevel, String)> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.with_level(AlertLevel::Error)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.with_level(AlertLevel::Warn)
    }

    fn with_level(&self, level: AlertLevel) -> Vec<String> {
        self.alerts()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, level: AlertLevel, message: &str) {
        self.alerts.lock().unwrap().push((level, message.to_string()));
    }
}

pub fn test_config(base_url: &str) -> IngestConfig {
    IngestConfig {
        common: CommonConfig::default(),
        service_name: "ingest-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 2,
            min_connections: 1,
        },
        up: UpConfig {
            api_key: Secret::new("up:yeah:test".to_string()),
            base_url: base_url.to_string(),
            page_size: 100,
        },
        webhook: WebhookConfig {
            secret: Secret::new(WEBHOOK_SECRET.to_string()),
        },
        notifier: NotifierConfig::default(),
        sync: SyncConfig::default(),
    }
}

/// Mock Up API plus an in-memory store wired into an [`Ingestor`].
pub struct TestContext {
    pub server: MockServer,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub ingestor: Ingestor,
    pub config: IngestConfig,
}

impl TestContext {
    pub async fn new() -> Self {
        init_tracing();

        let server = MockServer::start().await;
        let config = test_config(&server.uri());
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let ingestor = Ingestor::new(
            UpClient::new(&config.up),
            store.clone() as Arc<dyn Store>,
            notifier.clone() as Arc<dyn Notifier>,
        );

        Self {
            server,
            store,
            notifier,
            ingestor,
            config,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Serve `pages` as a linked listing at `listing_path`.
    pub async fn mount_listing(&self, listing_path: &str, pages: Vec<Vec<Value>>) {
        self.mount_filtered_listing(listing_path, None, pages).await;
    }

    /// Serve `pages` as a linked listing at `listing_path`, optionally only
    /// for requests carrying the given `filter` query parameter.
    pub async fn mount_filtered_listing(
        &self,
        listing_path: &str,
        filter: Option<(&str, &str)>,
        pages: Vec<Vec<Value>>,
    ) {
        let count = pages.len();
        for (i, data) in pages.into_iter().enumerate() {
            let next = (i + 1 < count).then(|| {
                let mut link = format!("{}{}?page[after]=cursor-{}", self.uri(), listing_path, i + 1);
                if let Some((key, value)) = filter {
                    link.push_str(&format!("&{}={}", key, value));
                }
                link
            });

            let mut mock = Mock::given(method("GET")).and(path(listing_path));
            mock = if i == 0 {
                mock.and(query_param_is_missing("page[after]"))
            } else {
                mock.and(query_param("page[after]", format!("cursor-{}", i)))
            };
            if let Some((key, value)) = filter {
                mock = mock.and(query_param(key, value));
            }

            mock.respond_with(ResponseTemplate::new(200).set_body_json(page(data, next)))
                .mount(&self.server)
                .await;
        }
    }

    /// Serve a single transaction document.
    pub async fn mount_transaction(&self, transaction: Value) {
        let id = transaction["id"].as_str().unwrap_or_default().to_string();
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": transaction })))
            .mount(&self.server)
            .await;
    }
}

// ============================================================================
// Up API fixtures
// ============================================================================

pub fn page(data: Vec<Value>, next: Option<String>) -> Value {
    json!({
        "data": data,
        "links": { "prev": null, "next": next }
    })
}

fn money(value_in_base_units: i64) -> Value {
    json!({
        "currencyCode": "AUD",
        "value": format!("{:.2}", value_in_base_units as f64 / 100.0),
        "valueInBaseUnits": value_in_base_units
    })
}

pub fn account(id: &str, value_in_base_units: i64) -> Value {
    json!({
        "type": "accounts",
        "id": id,
        "attributes": {
            "displayName": format!("Account {}", id),
            "accountType": "TRANSACTIONAL",
            "ownershipType": "INDIVIDUAL",
            "balance": money(value_in_base_units),
            "createdAt": "2023-01-01T00:00:00+11:00"
        }
    })
}

pub fn category(id: &str, parent: Option<&str>) -> Value {
    category_with_children(id, parent, &[])
}

pub fn category_with_children(id: &str, parent: Option<&str>, children: &[&str]) -> Value {
    json!({
        "type": "categories",
        "id": id,
        "attributes": { "name": id.replace('-', " ") },
        "relationships": {
            "parent": { "data": parent.map(|p| json!({ "type": "categories", "id": p })) },
            "children": {
                "data": children
                    .iter()
                    .map(|c| json!({ "type": "categories", "id": c }))
                    .collect::<Vec<_>>()
            }
        }
    })
}

pub fn tag(id: &str) -> Value {
    json!({ "type": "tags", "id": id })
}

/// Settled transaction with a round-up.
pub fn transaction(id: &str, account_id: &str, category_id: Option<&str>, tags: &[&str]) -> Value {
    json!({
        "type": "transactions",
        "id": id,
        "attributes": {
            "status": "SETTLED",
            "rawText": "SHOP 123",
            "description": "Shop",
            "message": null,
            "isCategorizable": true,
            "holdInfo": null,
            "roundUp": { "amount": money(-50), "boostPortion": null },
            "cashback": null,
            "amount": money(-950),
            "foreignAmount": null,
            "cardPurchaseMethod": { "method": "CARD_PIN", "cardNumberSuffix": "4321" },
            "settledAt": "2024-01-02T00:00:00Z",
            "createdAt": "2024-01-01T00:00:00Z"
        },
        "relationships": {
            "account": { "data": { "type": "accounts", "id": account_id } },
            "transferAccount": { "data": null },
            "category": { "data": category_id.map(|c| json!({ "type": "categories", "id": c })) },
            "parentCategory": { "data": null },
            "tags": { "data": tags.iter().map(|t| tag(t)).collect::<Vec<_>>() },
            "attachment": { "data": null }
        }
    })
}

pub fn transaction_identifier(id: &str) -> Value {
    json!({ "type": "transactions", "id": id })
}

pub fn webhook_event(event_type: &str, transaction_id: Option<&str>, related: Option<&str>) -> Value {
    let mut relationships = json!({
        "webhook": { "data": { "type": "webhooks", "id": "hook-1" } }
    });
    if let Some(id) = transaction_id {
        let mut rel = json!({ "data": { "type": "transactions", "id": id } });
        if let Some(link) = related {
            rel["links"] = json!({ "related": link });
        }
        relationships["transaction"] = rel;
    }

    json!({
        "data": {
            "type": "webhook-events",
            "id": "evt-1",
            "attributes": {
                "eventType": event_type,
                "createdAt": "2024-01-01T00:00:00Z"
            },
            "relationships": relationships
        }
    })
}
