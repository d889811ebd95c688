//! In-process store for tests.
//!
//! Mirrors the relational semantics of `PgStore`: upserts refresh
//! the same columns, foreign keys are enforced, tag deletes cascade to their
//! links, and `write_transactions` is all-or-nothing. Faults can be injected
//! per table to exercise rollback paths.

use async_trait::async_trait;
use chrono::Utc;
use ingest_service::models::{
    AccountRow, CashbackRow, CategoryRow, HoldInfoRow, RoundUpRow, Snapshot, StoredAccount,
    StoredCategory, StoredTransaction, TagRow, TransactionRow, TransactionTagRow, WrittenKey,
};
use ingest_service::services::store::{FanOutFn, Store};
use service_core::error::AppError;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Statement that should fail on its next executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteFault {
    Transactions,
    TransactionTags,
    HoldInfo,
    RoundUps,
    Cashback,
}

#[derive(Debug, Clone, Default)]
struct State {
    next_account_id: i64,
    next_transaction_id: i64,
    accounts: BTreeMap<String, StoredAccount>,
    categories: BTreeMap<String, StoredCategory>,
    tags: BTreeSet<String>,
    transactions: BTreeMap<String, StoredTransaction>,
    transaction_tags: BTreeSet<(i64, String)>,
    hold_info: BTreeMap<i64, HoldInfoRow>,
    round_ups: BTreeMap<i64, RoundUpRow>,
    cashback: BTreeMap<i64, CashbackRow>,
}

impl State {
    fn account_exists(&self, account_id: i64) -> bool {
        self.accounts.values().any(|a| a.account_id == account_id)
    }

    fn transaction_exists(&self, transaction_id: i64) -> bool {
        self.transactions
            .values()
            .any(|t| t.transaction_id == transaction_id)
    }

    fn transaction_mut(&mut self, transaction_id: i64) -> Option<&mut StoredTransaction> {
        self.transactions
            .values_mut()
            .find(|t| t.transaction_id == transaction_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: Mutex<HashSet<WriteFault>>,
}

fn constraint(message: String) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(message))
}

/// A bulk `ON CONFLICT DO UPDATE` cannot touch the same row twice.
fn reject_duplicates<'a>(table: &str, keys: impl Iterator<Item = &'a str>) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(constraint(format!(
                "ON CONFLICT DO UPDATE command cannot affect row a second time ({} {})",
                table, key
            )));
        }
    }
    Ok(())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write to `fault`'s table fail until cleared.
    pub fn fail_on(&self, fault: WriteFault) {
        self.faults().insert(fault);
    }

    pub fn clear_faults(&self) {
        self.faults().clear();
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, HashSet<WriteFault>> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_fault(&self, fault: WriteFault) -> Result<(), AppError> {
        if self.faults().contains(&fault) {
            return Err(constraint(format!("injected failure writing {:?}", fault)));
        }
        Ok(())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn account(&self, provider_id: &str) -> Option<StoredAccount> {
        self.state().accounts.get(provider_id).cloned()
    }

    pub fn accounts(&self) -> Vec<StoredAccount> {
        self.state().accounts.values().cloned().collect()
    }

    pub fn category(&self, category_id: &str) -> Option<StoredCategory> {
        self.state().categories.get(category_id).cloned()
    }

    pub fn tags(&self) -> Vec<String> {
        self.state().tags.iter().cloned().collect()
    }

    pub fn transaction(&self, provider_id: &str) -> Option<StoredTransaction> {
        self.state().transactions.get(provider_id).cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }

    /// Tag ids linked to the transaction with this provider id.
    pub fn transaction_tags(&self, provider_id: &str) -> Vec<String> {
        let state = self.state();
        let Some(tx) = state.transactions.get(provider_id) else {
            return Vec::new();
        };
        state
            .transaction_tags
            .iter()
            .filter(|(id, _)| *id == tx.transaction_id)
            .map(|(_, tag)| tag.clone())
            .collect()
    }

    pub fn hold_info(&self, transaction_id: i64) -> Option<HoldInfoRow> {
        self.state().hold_info.get(&transaction_id).cloned()
    }

    pub fn round_up(&self, transaction_id: i64) -> Option<RoundUpRow> {
        self.state().round_ups.get(&transaction_id).cloned()
    }

    pub fn cashback(&self, transaction_id: i64) -> Option<CashbackRow> {
        self.state().cashback.get(&transaction_id).cloned()
    }

    pub fn sub_row_counts(&self) -> (usize, usize, usize, usize) {
        let state = self.state();
        (
            state.transaction_tags.len(),
            state.hold_info.len(),
            state.round_ups.len(),
            state.cashback.len(),
        )
    }

    // =========================================================================
    // Writes against a working copy
    // =========================================================================

    fn apply_transactions(
        state: &mut State,
        rows: &[TransactionRow],
        actor: &str,
    ) -> Result<Vec<WrittenKey>, AppError> {
        reject_duplicates("transactions", rows.iter().map(|r| r.provider_id.as_str()))?;

        let now = Utc::now();
        let mut written = Vec::with_capacity(rows.len());

        for row in rows {
            if !state.account_exists(row.account_id) {
                return Err(constraint(format!(
                    "transactions.account_id {} violates foreign key",
                    row.account_id
                )));
            }
            if let Some(transfer) = row.transfer_account_id {
                if !state.account_exists(transfer) {
                    return Err(constraint(format!(
                        "transactions.transfer_account_id {} violates foreign key",
                        transfer
                    )));
                }
            }
            if let Some(category) = &row.category_id {
                if !state.categories.contains_key(category) {
                    return Err(constraint(format!(
                        "transactions.category_id {} violates foreign key",
                        category
                    )));
                }
            }

            let transaction_id = match state.transactions.get_mut(&row.provider_id) {
                Some(existing) => {
                    let created_at = existing.row.created_at;
                    let account_id = existing.row.account_id;
                    let transfer_account_id = existing.row.transfer_account_id;
                    existing.row = TransactionRow {
                        created_at,
                        account_id,
                        transfer_account_id,
                        ..row.clone()
                    };
                    existing.updated_at = Some(now);
                    existing.updated_by = Some(actor.to_string());
                    existing.transaction_id
                }
                None => {
                    state.next_transaction_id += 1;
                    let id = state.next_transaction_id;
                    state.transactions.insert(
                        row.provider_id.clone(),
                        StoredTransaction {
                            transaction_id: id,
                            row: row.clone(),
                            updated_at: Some(now),
                            updated_by: Some(actor.to_string()),
                            deleted_at: None,
                        },
                    );
                    id
                }
            };

            written.push(WrittenKey {
                transaction_id,
                provider_id: row.provider_id.clone(),
            });
        }

        Ok(written)
    }

    fn apply_tag_links(state: &mut State, rows: &[TransactionTagRow]) -> Result<(), AppError> {
        for row in rows {
            if !state.transaction_exists(row.transaction_id) || !state.tags.contains(&row.tag_id) {
                return Err(constraint(format!(
                    "transaction_tags ({}, {}) violates foreign key",
                    row.transaction_id, row.tag_id
                )));
            }
            state
                .transaction_tags
                .insert((row.transaction_id, row.tag_id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn upsert_accounts(&self, rows: &[AccountRow], actor: &str) -> Result<u64, AppError> {
        reject_duplicates("accounts", rows.iter().map(|r| r.provider_id.as_str()))?;

        let now = Utc::now();
        let mut state = self.state();
        for row in rows {
            match state.accounts.get_mut(&row.provider_id) {
                Some(existing) => {
                    let created_at = existing.row.created_at;
                    existing.row = AccountRow {
                        created_at,
                        ..row.clone()
                    };
                    existing.deleted_at = None;
                    existing.updated_at = Some(now);
                    existing.updated_by = Some(actor.to_string());
                }
                None => {
                    state.next_account_id += 1;
                    let account_id = state.next_account_id;
                    state.accounts.insert(
                        row.provider_id.clone(),
                        StoredAccount {
                            account_id,
                            row: row.clone(),
                            updated_at: Some(now),
                            updated_by: Some(actor.to_string()),
                            deleted_at: None,
                        },
                    );
                }
            }
        }
        Ok(rows.len() as u64)
    }

    async fn soft_delete_accounts_not_in(
        &self,
        keep: &[String],
        actor: &str,
    ) -> Result<u64, AppError> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let now = Utc::now();
        let mut deleted = 0;

        for account in self.state().accounts.values_mut() {
            if account.deleted_at.is_none() && !keep.contains(account.row.provider_id.as_str()) {
                account.deleted_at = Some(now);
                account.updated_at = Some(now);
                account.updated_by = Some(actor.to_string());
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn upsert_categories(&self, rows: &[CategoryRow]) -> Result<u64, AppError> {
        reject_duplicates("categories", rows.iter().map(|r| r.category_id.as_str()))?;

        let mut state = self.state();
        for row in rows {
            state
                .categories
                .entry(row.category_id.clone())
                .and_modify(|c| c.category_name = row.category_name.clone())
                .or_insert_with(|| StoredCategory {
                    category_id: row.category_id.clone(),
                    category_name: row.category_name.clone(),
                    category_parent_id: None,
                });
        }
        Ok(rows.len() as u64)
    }

    async fn assign_category_parent(&self, child: &str, parent: &str) -> Result<bool, AppError> {
        let mut state = self.state();
        if !state.categories.contains_key(parent) {
            return Err(constraint(format!(
                "categories.category_parent_id {} violates foreign key",
                parent
            )));
        }
        match state.categories.get_mut(child) {
            Some(c) if c.category_parent_id.as_deref() != Some(parent) => {
                c.category_parent_id = Some(parent.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn category_exists(&self, category_id: &str) -> Result<bool, AppError> {
        Ok(self.state().categories.contains_key(category_id))
    }

    async fn upsert_tags(&self, rows: &[TagRow]) -> Result<u64, AppError> {
        let mut state = self.state();
        let inserted = rows
            .iter()
            .filter(|r| state.tags.insert(r.tag_id.clone()))
            .count();
        Ok(inserted as u64)
    }

    async fn delete_tags_not_in(&self, keep: &[String]) -> Result<Vec<String>, AppError> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let mut state = self.state();

        let orphans: Vec<String> = state
            .tags
            .iter()
            .filter(|t| !keep.contains(t.as_str()))
            .cloned()
            .collect();
        for tag in &orphans {
            state.tags.remove(tag);
        }
        state
            .transaction_tags
            .retain(|(_, tag)| !orphans.contains(tag));

        Ok(orphans)
    }

    async fn tag_exists(&self, tag_id: &str) -> Result<bool, AppError> {
        Ok(self.state().tags.contains(tag_id))
    }

    async fn load_snapshot(&self) -> Result<Snapshot, AppError> {
        let state = self.state();
        Ok(Snapshot {
            accounts: state
                .accounts
                .values()
                .map(|a| (a.row.provider_id.clone(), a.account_id))
                .collect(),
            categories: state.categories.keys().cloned().collect(),
            tags: state.tags.iter().cloned().collect(),
        })
    }

    async fn write_transactions(
        &self,
        rows: &[TransactionRow],
        actor: &str,
        derive: &FanOutFn<'_>,
    ) -> Result<Vec<WrittenKey>, AppError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = self.state();
        let mut working = guard.clone();

        self.check_fault(WriteFault::Transactions)?;
        let written = Self::apply_transactions(&mut working, rows, actor)?;

        let fan_out = derive(&written)?;

        if !fan_out.tags.is_empty() {
            self.check_fault(WriteFault::TransactionTags)?;
            Self::apply_tag_links(&mut working, &fan_out.tags)?;
        }
        if !fan_out.hold_info.is_empty() {
            self.check_fault(WriteFault::HoldInfo)?;
            for row in &fan_out.hold_info {
                working.hold_info.insert(row.transaction_id, row.clone());
            }
        }
        if !fan_out.round_ups.is_empty() {
            self.check_fault(WriteFault::RoundUps)?;
            for row in &fan_out.round_ups {
                working.round_ups.insert(row.transaction_id, row.clone());
            }
        }
        if !fan_out.cashback.is_empty() {
            self.check_fault(WriteFault::Cashback)?;
            for row in &fan_out.cashback {
                working.cashback.insert(row.transaction_id, row.clone());
            }
        }

        *guard = working;
        Ok(written)
    }

    async fn soft_delete_transaction(
        &self,
        provider_id: &str,
        actor: &str,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        match self.state().transactions.get_mut(provider_id) {
            Some(tx) => {
                tx.deleted_at = Some(now);
                tx.updated_at = Some(now);
                tx.updated_by = Some(actor.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_transaction_id(&self, provider_id: &str) -> Result<Option<i64>, AppError> {
        Ok(self
            .state()
            .transactions
            .get(provider_id)
            .map(|t| t.transaction_id))
    }

    async fn transaction_ids_by_tag(&self, tag_id: &str) -> Result<Vec<String>, AppError> {
        let state = self.state();
        Ok(state
            .transactions
            .values()
            .filter(|t| {
                state
                    .transaction_tags
                    .contains(&(t.transaction_id, tag_id.to_string()))
            })
            .map(|t| t.row.provider_id.clone())
            .collect())
    }

    async fn transaction_ids_by_category(
        &self,
        category_id: &str,
    ) -> Result<Vec<String>, AppError> {
        Ok(self
            .state()
            .transactions
            .values()
            .filter(|t| t.row.category_id.as_deref() == Some(category_id))
            .map(|t| t.row.provider_id.clone())
            .collect())
    }

    async fn link_tag(&self, transaction_id: i64, tag_id: &str) -> Result<(), AppError> {
        self.check_fault(WriteFault::TransactionTags)?;
        Self::apply_tag_links(
            &mut self.state(),
            &[TransactionTagRow {
                transaction_id,
                tag_id: tag_id.to_string(),
            }],
        )
    }

    async fn unlink_tag(&self, transaction_id: i64, tag_id: &str) -> Result<(), AppError> {
        self.check_fault(WriteFault::TransactionTags)?;
        self.state()
            .transaction_tags
            .remove(&(transaction_id, tag_id.to_string()));
        Ok(())
    }

    async fn set_transaction_category(
        &self,
        transaction_id: i64,
        category_id: &str,
        actor: &str,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        if !state.categories.contains_key(category_id) {
            return Err(constraint(format!(
                "transactions.category_id {} violates foreign key",
                category_id
            )));
        }
        if let Some(tx) = state.transaction_mut(transaction_id) {
            tx.row.category_id = Some(category_id.to_string());
            tx.updated_at = Some(Utc::now());
            tx.updated_by = Some(actor.to_string());
        }
        Ok(())
    }

    async fn clear_transaction_category(
        &self,
        transaction_id: i64,
        category_id: &str,
        actor: &str,
    ) -> Result<bool, AppError> {
        let mut state = self.state();
        match state.transaction_mut(transaction_id) {
            Some(tx) if tx.row.category_id.as_deref() == Some(category_id) => {
                tx.row.category_id = None;
                tx.updated_at = Some(Utc::now());
                tx.updated_by = Some(actor.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
