use crate::models::actor;
use crate::processors::Ingestor;
use crate::provider::resources::{CategoryResource, ResourceIdentifier, TagResource};
use crate::provider::{walk, Collector};
use crate::services::metrics::record_reconciliation_operation;
use crate::services::notifier::AlertLevel;
use crate::services::reconciler::{ReconcileOutcome, Reconciler};
use futures::stream::{self, StreamExt};
use service_core::error::AppError;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

const TAG_KIND: &str = "tags";
const CATEGORY_KIND: &str = "categories";

const TAG_PASS: &str = "syncTaggedTransactions";
const CATEGORY_PASS: &str = "syncCategorisedTransactions";

/// Totals for one association kind (tags or categories).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationSummary {
    pub reconciled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub inserted: usize,
    pub deleted: usize,
}

impl AssociationSummary {
    fn add(&mut self, item: ItemResult) {
        match item {
            ItemResult::Reconciled(outcome) => {
                self.reconciled += 1;
                self.inserted += outcome.inserted;
                self.deleted += outcome.deleted;
            }
            ItemResult::Skipped => self.skipped += 1,
            ItemResult::Failed => self.failed += 1,
        }
    }
}

/// Outcome of a sync run. Each pass is `None` when it failed at its boundary.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub deleted_tags: Option<Vec<String>>,
    pub tags: Option<AssociationSummary>,
    pub categories: Option<AssociationSummary>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.deleted_tags.is_some() && self.tags.is_some() && self.categories.is_some()
    }
}

enum ItemResult {
    Reconciled(ReconcileOutcome),
    Skipped,
    Failed,
}

/// Which association a reconciliation pass maintains.
#[derive(Debug, Clone, Copy)]
enum Association {
    Tag,
    Category,
}

impl Association {
    fn kind(&self) -> &'static str {
        match self {
            Self::Tag => TAG_KIND,
            Self::Category => CATEGORY_KIND,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Category => "category",
        }
    }

    fn filter(&self) -> &'static str {
        match self {
            Self::Tag => "filter[tag]",
            Self::Category => "filter[category]",
        }
    }
}

/// Periodic reconciliation: tag pass, then tag associations, then category
/// associations for child categories.
///
/// Each pass is guarded, so a failed tag or category listing is alerted and
/// the remaining passes still run. Per-item failures are alerted and counted.
#[instrument(skip(ingestor))]
pub async fn run_sync(ingestor: &Ingestor, concurrency: usize) -> SyncReport {
    let started = Instant::now();
    let reconciler = Reconciler::new(concurrency);

    let deleted_tags = ingestor
        .guarded(actor::TAGS, ingestor.process_tags())
        .await;

    let tags = ingestor
        .guarded(
            TAG_PASS,
            sync_tag_associations(ingestor, &reconciler, concurrency),
        )
        .await;
    info!(summary = ?tags, "Tag associations reconciled");

    let categories = ingestor
        .guarded(
            CATEGORY_PASS,
            sync_category_associations(ingestor, &reconciler, concurrency),
        )
        .await;
    info!(summary = ?categories, "Category associations reconciled");

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Sync finished");
    SyncReport {
        deleted_tags,
        tags,
        categories,
    }
}

async fn sync_tag_associations(
    ingestor: &Ingestor,
    reconciler: &Reconciler,
    concurrency: usize,
) -> Result<AssociationSummary, AppError> {
    let link = ingestor.client().listing_url("/tags", &[])?;
    let mut tags = Collector::<TagResource>::default();
    walk(ingestor.client(), &link, &mut tags).await?;

    let items = tags.items.into_iter().map(|t| ResourceIdentifier {
        kind: t.kind,
        id: t.id,
    });
    Ok(reconcile_all(ingestor, reconciler, concurrency, Association::Tag, items).await)
}

async fn sync_category_associations(
    ingestor: &Ingestor,
    reconciler: &Reconciler,
    concurrency: usize,
) -> Result<AssociationSummary, AppError> {
    let link = ingestor.client().listing_url("/categories", &[])?;
    let mut categories = Collector::<CategoryResource>::default();
    walk(ingestor.client(), &link, &mut categories).await?;

    let items = categories
        .items
        .into_iter()
        .filter(CategoryResource::is_child)
        .map(|c| ResourceIdentifier {
            kind: c.kind,
            id: c.id,
        });
    Ok(reconcile_all(ingestor, reconciler, concurrency, Association::Category, items).await)
}

async fn reconcile_all(
    ingestor: &Ingestor,
    reconciler: &Reconciler,
    concurrency: usize,
    association: Association,
    items: impl Iterator<Item = ResourceIdentifier>,
) -> AssociationSummary {
    stream::iter(items)
        .map(|item| reconcile_item(ingestor, reconciler, association, item))
        .buffer_unordered(concurrency.max(1))
        .fold(AssociationSummary::default(), |mut summary, item| async move {
            summary.add(item);
            summary
        })
        .await
}

async fn reconcile_item(
    ingestor: &Ingestor,
    reconciler: &Reconciler,
    association: Association,
    item: ResourceIdentifier,
) -> ItemResult {
    let label = association.label();

    if item.kind != association.kind() {
        alert(
            ingestor,
            &format!(
                "syncData: Unexpected resource type for {} {}: {}",
                label, item.id, item.kind
            ),
        )
        .await;
        return ItemResult::Skipped;
    }

    match reconcile_members(ingestor, reconciler, association, &item.id).await {
        Ok(Some(outcome)) => {
            record_reconciliation_operation(label, "success");
            ItemResult::Reconciled(outcome)
        }
        Ok(None) => ItemResult::Skipped,
        Err(e) => {
            record_reconciliation_operation(label, "failure");
            error!(id = %item.id, error = %e, "Reconciliation failed for {}", label);
            alert(
                ingestor,
                &format!("syncData: Error reconciling {} {}: {}", label, item.id, e),
            )
            .await;
            ItemResult::Failed
        }
    }
}

/// Reconcile the transactions carrying one tag or category. Returns `None`
/// when the tag or category is not stored locally.
async fn reconcile_members(
    ingestor: &Ingestor,
    reconciler: &Reconciler,
    association: Association,
    id: &str,
) -> Result<Option<ReconcileOutcome>, AppError> {
    let store = ingestor.store().as_ref();
    let label = association.label();

    let exists = match association {
        Association::Tag => store.tag_exists(id).await?,
        Association::Category => store.category_exists(id).await?,
    };
    if !exists {
        alert(
            ingestor,
            &format!("syncData: {} {} not found locally", label, id),
        )
        .await;
        return Ok(None);
    }

    let link = ingestor
        .client()
        .listing_url("/transactions", &[(association.filter(), id)])?;
    let mut remote = Collector::<ResourceIdentifier>::default();
    walk(ingestor.client(), &link, &mut remote).await?;
    let remote: Vec<String> = remote.items.into_iter().map(|r| r.id).collect();

    let local = match association {
        Association::Tag => store.transaction_ids_by_tag(id).await?,
        Association::Category => store.transaction_ids_by_category(id).await?,
    };

    let outcome = reconciler
        .reconcile(
            remote,
            local,
            move |provider_id: String| async move {
                let transaction_id = resolve(ingestor, &provider_id).await?;
                match association {
                    Association::Tag => store.link_tag(transaction_id, id).await,
                    Association::Category => {
                        store
                            .set_transaction_category(transaction_id, id, actor::SYNC)
                            .await
                    }
                }
            },
            move |provider_id: String| async move {
                let transaction_id = resolve(ingestor, &provider_id).await?;
                match association {
                    Association::Tag => store.unlink_tag(transaction_id, id).await,
                    Association::Category => {
                        let cleared = store
                            .clear_transaction_category(transaction_id, id, actor::SYNC)
                            .await?;
                        if !cleared {
                            warn!(
                                transaction = %provider_id,
                                category = %id,
                                "Category already changed, left in place"
                            );
                        }
                        Ok(())
                    }
                }
            },
        )
        .await;

    info!(
        id = %id,
        kind = label,
        inserted = outcome.inserted,
        deleted = outcome.deleted,
        "Reconciled associations"
    );
    Ok(Some(outcome))
}

/// Local id for a provider transaction id, alerting when it is unknown.
async fn resolve(ingestor: &Ingestor, provider_id: &str) -> Result<i64, AppError> {
    match ingestor.store().find_transaction_id(provider_id).await? {
        Some(id) => Ok(id),
        None => Err(ingestor
            .notifier()
            .fail(&format!(
                "syncData: Transaction {} not found locally",
                provider_id
            ))
            .await),
    }
}

async fn alert(ingestor: &Ingestor, message: &str) {
    let _ = ingestor.notifier().notify(AlertLevel::Error, message).await;
}
