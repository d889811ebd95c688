use super::Ingestor;
use crate::models::{
    actor, CashbackRow, FanOut, HoldInfoRow, RoundUpRow, Snapshot, TransactionRow,
    TransactionTagRow, WrittenKey,
};
use crate::provider::resources::{Document, TransactionResource};
use crate::provider::{walk, PageHandler, ProviderError};
use crate::services::notifier::AlertLevel;
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Counters for one transaction run, logged as a summary at the end.
#[derive(Debug)]
pub struct TransactionRunMetrics {
    pub pages: u32,
    pub page_timings: Vec<Duration>,
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub missing_accounts: BTreeSet<String>,
    pub missing_categories: BTreeSet<String>,
    started: Instant,
}

impl Default for TransactionRunMetrics {
    fn default() -> Self {
        Self {
            pages: 0,
            page_timings: Vec::new(),
            total: 0,
            processed: 0,
            skipped: 0,
            missing_accounts: BTreeSet::new(),
            missing_categories: BTreeSet::new(),
            started: Instant::now(),
        }
    }
}

impl TransactionRunMetrics {
    fn finish_page(&mut self, started: Instant) -> Duration {
        let elapsed = started.elapsed();
        self.page_timings.push(elapsed);
        self.pages += 1;
        elapsed
    }

    fn timing_ms(&self) -> (u128, Option<u128>, Option<u128>) {
        let millis: Vec<u128> = self.page_timings.iter().map(|d| d.as_millis()).collect();
        let avg = if millis.is_empty() {
            0
        } else {
            millis.iter().sum::<u128>() / millis.len() as u128
        };
        (avg, millis.iter().min().copied(), millis.iter().max().copied())
    }

    pub fn log_summary(&self, process: &str) {
        let (avg, min, max) = self.timing_ms();
        info!(
            process = process,
            pages = self.pages,
            total = self.total,
            processed = self.processed,
            skipped = self.skipped,
            missing_accounts = ?self.missing_accounts,
            missing_categories = ?self.missing_categories,
            total_ms = self.started.elapsed().as_millis() as u64,
            avg_page_ms = avg as u64,
            min_page_ms = ?min,
            max_page_ms = ?max,
            "Finished processing transactions"
        );
    }
}

/// Map one provider transaction onto a storage row, resolving foreign keys
/// against `snapshot`.
///
/// A missing payer or transfer account drops the transaction; a missing
/// category only nulls it. Both are recorded in `metrics`.
pub fn remap_transaction(
    transaction: &TransactionResource,
    snapshot: &Snapshot,
    page: u32,
    metrics: &mut TransactionRunMetrics,
) -> Option<TransactionRow> {
    let id = &transaction.id;
    let attributes = &transaction.attributes;
    let relationships = &transaction.relationships;

    let payer = &relationships.account.data.id;
    let Some(&account_id) = snapshot.accounts.get(payer) else {
        error!(transaction = %id, page = page, account = %payer, "Missing account");
        metrics.missing_accounts.insert(payer.clone());
        return None;
    };

    let transfer_account_id = match relationships.transfer_account.id() {
        Some(transfer) => match snapshot.accounts.get(transfer) {
            Some(&local) => Some(local),
            None => {
                error!(transaction = %id, page = page, account = %transfer, "Missing transfer account");
                metrics.missing_accounts.insert(transfer.to_string());
                return None;
            }
        },
        None => None,
    };

    let category_id = match relationships.category.id() {
        Some(category) if snapshot.categories.contains(category) => Some(category.to_string()),
        Some(category) => {
            warn!(transaction = %id, page = page, category = %category, "Missing category");
            metrics.missing_categories.insert(category.to_string());
            None
        }
        None => None,
    };

    Some(TransactionRow {
        provider_id: id.clone(),
        transaction_type: attributes.transaction_type.clone(),
        status: attributes.status,
        attachment_id: relationships.attachment.id().map(str::to_string),
        raw_text: attributes.raw_text.clone(),
        description: attributes.description.clone(),
        message: attributes.message.clone(),
        note: attributes.note.as_ref().map(|n| n.text.clone()),
        card_purchase_method: attributes
            .card_purchase_method
            .as_ref()
            .map(|c| c.method.clone()),
        card_number_suffix: attributes
            .card_purchase_method
            .as_ref()
            .and_then(|c| c.card_number_suffix.clone()),
        customer_display_name: attributes
            .performing_customer
            .as_ref()
            .map(|c| c.display_name.clone()),
        deep_link_url: attributes.deep_link_url.clone(),
        is_categorizable: attributes.is_categorizable,
        currency_code: attributes.amount.currency_code.clone(),
        value: attributes.amount.value.clone(),
        value_in_base_units: attributes.amount.value_in_base_units,
        foreign_currency_code: attributes
            .foreign_amount
            .as_ref()
            .map(|m| m.currency_code.clone()),
        foreign_value: attributes.foreign_amount.as_ref().map(|m| m.value.clone()),
        foreign_value_in_base_units: attributes
            .foreign_amount
            .as_ref()
            .map(|m| m.value_in_base_units),
        created_at: attributes.created_at,
        settled_at: attributes.settled_at,
        account_id,
        transfer_account_id,
        category_id,
    })
}

/// Build the dependent rows for the transactions that were written.
///
/// Tag links are limited to tags in `known_tags`. A written key with no
/// source payload is an internal inconsistency and fails the whole batch.
pub fn derive_fan_out(
    written: &[WrittenKey],
    sources: &HashMap<&str, &TransactionResource>,
    known_tags: &HashSet<String>,
) -> Result<FanOut, String> {
    let mut fan_out = FanOut::default();

    for key in written {
        let Some(source) = sources.get(key.provider_id.as_str()) else {
            return Err(key.provider_id.clone());
        };
        let id = key.transaction_id;
        let attributes = &source.attributes;

        fan_out.tags.extend(
            source
                .relationships
                .tags
                .data
                .iter()
                .filter(|t| known_tags.contains(&t.id))
                .map(|t| TransactionTagRow {
                    transaction_id: id,
                    tag_id: t.id.clone(),
                }),
        );

        if let Some(hold) = &attributes.hold_info {
            fan_out.hold_info.push(HoldInfoRow {
                transaction_id: id,
                currency_code: hold.amount.currency_code.clone(),
                value: hold.amount.value.clone(),
                value_in_base_units: hold.amount.value_in_base_units,
                foreign_currency_code: hold.foreign_amount.as_ref().map(|m| m.currency_code.clone()),
                foreign_value: hold.foreign_amount.as_ref().map(|m| m.value.clone()),
                foreign_value_in_base_units: hold
                    .foreign_amount
                    .as_ref()
                    .map(|m| m.value_in_base_units),
            });
        }

        if let Some(round_up) = &attributes.round_up {
            fan_out.round_ups.push(RoundUpRow {
                transaction_id: id,
                currency_code: round_up.amount.currency_code.clone(),
                value: round_up.amount.value.clone(),
                value_in_base_units: round_up.amount.value_in_base_units,
                boost_currency_code: round_up
                    .boost_portion
                    .as_ref()
                    .map(|m| m.currency_code.clone()),
                boost_value: round_up.boost_portion.as_ref().map(|m| m.value.clone()),
                boost_value_in_base_units: round_up
                    .boost_portion
                    .as_ref()
                    .map(|m| m.value_in_base_units),
            });
        }

        if let Some(cashback) = &attributes.cashback {
            fan_out.cashback.push(CashbackRow {
                transaction_id: id,
                description: cashback.description.clone(),
                currency_code: cashback.amount.currency_code.clone(),
                value: cashback.amount.value.clone(),
                value_in_base_units: cashback.amount.value_in_base_units,
            });
        }
    }

    Ok(fan_out)
}

/// Keep the last occurrence of each provider id, preserving order.
fn dedupe_last(items: Vec<TransactionResource>) -> Vec<TransactionResource> {
    let mut last: HashMap<String, usize> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        last.insert(item.id.clone(), i);
    }
    items
        .into_iter()
        .enumerate()
        .filter(|(i, item)| last.get(&item.id) == Some(i))
        .map(|(_, item)| item)
        .collect()
}

struct TransactionPages<'a> {
    ingestor: &'a Ingestor,
    metrics: &'a mut TransactionRunMetrics,
    actor: &'static str,
}

#[async_trait]
impl<'a> PageHandler<TransactionResource> for TransactionPages<'a> {
    async fn handle(&mut self, items: Vec<TransactionResource>, page: u32) -> Result<(), AppError> {
        self.ingestor
            .upsert_transaction_page(items, page, self.metrics, self.actor)
            .await
    }
}

impl Ingestor {
    /// Write one page of transactions and their dependent rows atomically.
    ///
    /// Foreign keys resolve against a snapshot taken at the start of the
    /// page, so accounts or categories created after it are reported missing.
    pub async fn upsert_transaction_page(
        &self,
        items: Vec<TransactionResource>,
        page: u32,
        metrics: &mut TransactionRunMetrics,
        actor: &'static str,
    ) -> Result<(), AppError> {
        let started = Instant::now();
        let snapshot = self.store.load_snapshot().await?;

        info!(page = page, "Processing transactions");
        let received = items.len();
        metrics.total += received;
        let items = dedupe_last(items);

        let rows: Vec<TransactionRow> = items
            .iter()
            .filter_map(|tx| remap_transaction(tx, &snapshot, page, metrics))
            .collect();
        // Superseded duplicates count as skipped alongside dropped rows.
        let skipped = received - rows.len();
        metrics.skipped += skipped;

        if rows.is_empty() {
            warn!(page = page, "No valid transactions");
            metrics.finish_page(started);
            return Ok(());
        }

        let sources: HashMap<&str, &TransactionResource> =
            items.iter().map(|tx| (tx.id.as_str(), tx)).collect();
        let missing: OnceLock<String> = OnceLock::new();
        let derive = |written: &[WrittenKey]| {
            derive_fan_out(written, &sources, &snapshot.tags).map_err(|provider_id| {
                let _ = missing.set(provider_id.clone());
                AppError::InternalError(anyhow::anyhow!(
                    "Written transaction not found in page: {}",
                    provider_id
                ))
            })
        };

        let written = match self.store.write_transactions(&rows, actor, &derive).await {
            Ok(written) => written,
            Err(e) => {
                error!(page = page, transactions = rows.len(), error = %e, "Error inserting transactions");
                if let Some(provider_id) = missing.get() {
                    return Err(self
                        .notifier
                        .fail(&format!(
                            "Inserted transaction not found during upsert: {}",
                            provider_id
                        ))
                        .await);
                }
                return Err(e);
            }
        };

        metrics.processed += written.len();
        let elapsed = metrics.finish_page(started);
        info!(
            page = page,
            processed = written.len(),
            skipped = skipped,
            elapsed_ms = elapsed.as_millis() as u64,
            "Finished processing transactions"
        );
        Ok(())
    }

    /// Walk the full transaction listing.
    #[instrument(skip(self))]
    pub async fn process_transactions(&self) -> Result<TransactionRunMetrics, AppError> {
        let mut metrics = TransactionRunMetrics::default();
        let link = self.client.listing_url("/transactions", &[])?;

        let result = {
            let mut pages = TransactionPages {
                ingestor: self,
                metrics: &mut metrics,
                actor: actor::TRANSACTIONS,
            };
            walk(&self.client, &link, &mut pages).await
        };

        match result {
            Ok(_) => {
                metrics.log_summary(actor::TRANSACTIONS);
                Ok(metrics)
            }
            Err(e) => {
                error!(
                    error = %e,
                    missing_accounts = ?metrics.missing_accounts,
                    missing_categories = ?metrics.missing_categories,
                    "Error in processTransactions"
                );
                Err(e)
            }
        }
    }

    /// Fetch one transaction by link and upsert it with its dependent rows.
    ///
    /// A non-success fetch raises a warning and writes nothing. Returns
    /// whether the transaction was fetched.
    #[instrument(skip(self))]
    pub async fn process_transaction(&self, link: &str) -> Result<bool, AppError> {
        let document: Document<TransactionResource> = match self.client.get(link).await {
            Ok(document) => document,
            Err(ProviderError::Http { status, .. }) => {
                self.notifier
                    .notify(
                        AlertLevel::Warn,
                        &format!("processTransaction: Failed to fetch transaction: {}", status),
                    )
                    .await?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let mut metrics = TransactionRunMetrics::default();
        self.upsert_transaction_page(vec![document.data], 1, &mut metrics, actor::TRANSACTION)
            .await?;
        metrics.log_summary(actor::TRANSACTION);

        Ok(true)
    }

    /// Soft-delete one transaction by provider id. Dependent rows are kept.
    #[instrument(skip(self))]
    pub async fn delete_transaction(&self, provider_id: &str) -> Result<bool, AppError> {
        let deleted = self
            .store
            .soft_delete_transaction(provider_id, actor::TRANSACTION)
            .await?;

        if deleted {
            info!(transaction = %provider_id, "Deleted transaction");
        } else {
            warn!(transaction = %provider_id, "Transaction to delete not found locally");
        }
        Ok(deleted)
    }
}
