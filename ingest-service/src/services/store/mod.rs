//! Storage seam between the processors and the relational store.

mod postgres;

pub use postgres::PgStore;

use crate::models::{
    AccountRow, CategoryRow, FanOut, Snapshot, TagRow, TransactionRow, WrittenKey,
};
use async_trait::async_trait;
use service_core::error::AppError;

/// Derives the dependent rows for a batch once the parent rows have local
/// ids. Returning an error rolls the whole batch back.
pub type FanOutFn<'a> = dyn Fn(&[WrittenKey]) -> Result<FanOut, AppError> + Send + Sync + 'a;

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Insert or refresh accounts by provider id. Reappearing accounts are
    /// un-deleted.
    async fn upsert_accounts(&self, rows: &[AccountRow], actor: &str) -> Result<u64, AppError>;

    /// Soft-delete live accounts whose provider id is not in `keep`.
    async fn soft_delete_accounts_not_in(
        &self,
        keep: &[String],
        actor: &str,
    ) -> Result<u64, AppError>;

    // =========================================================================
    // Categories
    // =========================================================================

    async fn upsert_categories(&self, rows: &[CategoryRow]) -> Result<u64, AppError>;

    /// Point `child` at `parent`. Returns false when nothing changed (already
    /// pointing there, or no such child).
    async fn assign_category_parent(&self, child: &str, parent: &str) -> Result<bool, AppError>;

    async fn category_exists(&self, category_id: &str) -> Result<bool, AppError>;

    // =========================================================================
    // Tags
    // =========================================================================

    async fn upsert_tags(&self, rows: &[TagRow]) -> Result<u64, AppError>;

    /// Hard-delete tags not in `keep`, returning the deleted ids.
    async fn delete_tags_not_in(&self, keep: &[String]) -> Result<Vec<String>, AppError>;

    async fn tag_exists(&self, tag_id: &str) -> Result<bool, AppError>;

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Foreign-key lookup tables for a page of transactions.
    async fn load_snapshot(&self) -> Result<Snapshot, AppError>;

    /// Upsert `rows` and their dependent rows in one atomic scope.
    ///
    /// `derive` receives the keys actually written and produces the tag
    /// links, hold info, round-ups and cashback for them. Nothing is visible
    /// unless every statement succeeds.
    async fn write_transactions(
        &self,
        rows: &[TransactionRow],
        actor: &str,
        derive: &FanOutFn<'_>,
    ) -> Result<Vec<WrittenKey>, AppError>;

    /// Stamp `deleted_at`; dependent rows are left in place. Returns false
    /// when the provider id is unknown.
    async fn soft_delete_transaction(&self, provider_id: &str, actor: &str)
        -> Result<bool, AppError>;

    async fn find_transaction_id(&self, provider_id: &str) -> Result<Option<i64>, AppError>;

    /// Provider ids of transactions linked to `tag_id`.
    async fn transaction_ids_by_tag(&self, tag_id: &str) -> Result<Vec<String>, AppError>;

    /// Provider ids of transactions filed under `category_id`.
    async fn transaction_ids_by_category(&self, category_id: &str)
        -> Result<Vec<String>, AppError>;

    async fn link_tag(&self, transaction_id: i64, tag_id: &str) -> Result<(), AppError>;

    async fn unlink_tag(&self, transaction_id: i64, tag_id: &str) -> Result<(), AppError>;

    async fn set_transaction_category(
        &self,
        transaction_id: i64,
        category_id: &str,
        actor: &str,
    ) -> Result<(), AppError>;

    /// Clear the category only if it is still `category_id`.
    async fn clear_transaction_category(
        &self,
        transaction_id: i64,
        category_id: &str,
        actor: &str,
    ) -> Result<bool, AppError>;
}
