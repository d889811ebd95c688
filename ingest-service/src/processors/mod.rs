//! Entity processors: page through an Up listing, remap each resource into
//! storage rows and write them through the [`Store`].

mod accounts;
mod categories;
mod tags;
mod transactions;

pub use transactions::{derive_fan_out, remap_transaction, TransactionRunMetrics};

use crate::provider::UpClient;
use crate::services::metrics::record_job_run;
use crate::services::notifier::{AlertLevel, Notifier};
use crate::services::store::Store;
use service_core::error::AppError;
use std::future::Future;
use std::sync::Arc;

/// Shared handle used by every entry point (webhook, sync, load).
#[derive(Clone)]
pub struct Ingestor {
    client: UpClient,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl Ingestor {
    pub fn new(client: UpClient, store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            client,
            store,
            notifier,
        }
    }

    pub fn client(&self) -> &UpClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Run `work` as a processor boundary: failures are logged and alerted at
    /// error level, then swallowed so sibling work can continue.
    pub async fn guarded<T, F>(&self, process: &str, work: F) -> Option<T>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match work.await {
            Ok(value) => {
                record_job_run(process, "success");
                Some(value)
            }
            Err(e) => {
                record_job_run(process, "failure");
                tracing::error!(process = process, error = %e, "Processor failed");
                let _ = self
                    .notifier
                    .notify(AlertLevel::Error, &format!("Error in {}: {}", process, e))
                    .await;
                None
            }
        }
    }
}
