//! Services module for ingest-service.

pub mod metrics;
pub mod notifier;
pub mod reconciler;
pub mod store;
pub mod upsert;

pub use metrics::{get_metrics, init_metrics};
pub use notifier::{AlertLevel, Notifier};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use store::{PgStore, Store};
