use crate::models::actor;
use crate::processors::Ingestor;
use tracing::{info, instrument};

/// Stages of a load run that failed at their boundary.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub failed: Vec<&'static str>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Full ingestion: accounts, categories, tags, then transactions.
///
/// Each stage is guarded, so a failing stage is alerted and the next one
/// still runs.
#[instrument(skip(ingestor))]
pub async fn run_load(ingestor: &Ingestor) -> LoadReport {
    let mut report = LoadReport::default();

    if ingestor
        .guarded(actor::ACCOUNTS, ingestor.process_accounts())
        .await
        .is_none()
    {
        report.failed.push(actor::ACCOUNTS);
    }

    if ingestor
        .guarded(actor::CATEGORIES, ingestor.process_categories())
        .await
        .is_none()
    {
        report.failed.push(actor::CATEGORIES);
    }

    if ingestor
        .guarded(actor::TAGS, ingestor.process_tags())
        .await
        .is_none()
    {
        report.failed.push(actor::TAGS);
    }

    if ingestor
        .guarded(actor::TRANSACTIONS, ingestor.process_transactions())
        .await
        .is_none()
    {
        report.failed.push(actor::TRANSACTIONS);
    }

    info!(failed = ?report.failed, "Load finished");
    report
}
