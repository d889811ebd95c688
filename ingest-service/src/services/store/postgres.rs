//! PostgreSQL store.

use super::{FanOutFn, Store};
use crate::models::{
    AccountRow, CategoryRow, Snapshot, TagRow, TransactionRow, WrittenKey,
};
use crate::services::metrics::{record_rows_upserted, DB_QUERY_DURATION};
use crate::services::upsert::{self, build_upsert, UpsertRow, UpsertSpec};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "ingest-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Run one bulk upsert outside any transaction.
    async fn execute_upsert<R: UpsertRow>(
        &self,
        spec: &UpsertSpec,
        rows: &[R],
        actor: &str,
    ) -> Result<u64, AppError> {
        let Some(mut builder) = build_upsert(spec, rows, actor) else {
            return Ok(0);
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&[spec.table])
            .start_timer();

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert {}: {}", spec.table, e))
        })?;

        timer.observe_duration();
        record_rows_upserted(spec.table, rows.len());
        debug!(table = spec.table, rows = rows.len(), "Upserted rows");

        Ok(result.rows_affected())
    }

    async fn exists(&self, operation: &str, sql: &str, id: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let found = sqlx::query_scalar::<_, bool>(sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", operation, e)))?;

        timer.observe_duration();
        Ok(found)
    }
}

/// Run one bulk upsert inside an open transaction.
async fn execute_in_tx<R: UpsertRow>(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    spec: &UpsertSpec,
    rows: &[R],
    actor: &str,
) -> Result<(), AppError> {
    let Some(mut builder) = build_upsert(spec, rows, actor) else {
        return Ok(());
    };

    builder.build().execute(&mut **tx).await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to upsert {}: {}", spec.table, e))
    })?;

    record_rows_upserted(spec.table, rows.len());
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert_accounts(&self, rows: &[AccountRow], actor: &str) -> Result<u64, AppError> {
        self.execute_upsert(&upsert::ACCOUNTS, rows, actor).await
    }

    #[instrument(skip(self, keep), fields(keep = keep.len()))]
    async fn soft_delete_accounts_not_in(
        &self,
        keep: &[String],
        actor: &str,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["soft_delete_accounts"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET deleted_at = NOW(), updated_at = NOW(), updated_by = $2
            WHERE deleted_at IS NULL AND NOT (provider_id = ANY($1))
            "#,
        )
        .bind(keep)
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to soft-delete accounts: {}", e)))?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Categories
    // =========================================================================

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert_categories(&self, rows: &[CategoryRow]) -> Result<u64, AppError> {
        self.execute_upsert(&upsert::CATEGORIES, rows, "").await
    }

    #[instrument(skip(self))]
    async fn assign_category_parent(&self, child: &str, parent: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assign_category_parent"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE categories
            SET category_parent_id = $2
            WHERE category_id = $1 AND category_parent_id IS DISTINCT FROM $2
            "#,
        )
        .bind(child)
        .bind(parent)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to assign category parent: {}", e)))?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn category_exists(&self, category_id: &str) -> Result<bool, AppError> {
        self.exists(
            "category_exists",
            "SELECT EXISTS (SELECT 1 FROM categories WHERE category_id = $1)",
            category_id,
        )
        .await
    }

    // =========================================================================
    // Tags
    // =========================================================================

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert_tags(&self, rows: &[TagRow]) -> Result<u64, AppError> {
        self.execute_upsert(&upsert::TAGS, rows, "").await
    }

    #[instrument(skip(self, keep), fields(keep = keep.len()))]
    async fn delete_tags_not_in(&self, keep: &[String]) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_tags"])
            .start_timer();

        let deleted = sqlx::query_scalar::<_, String>(
            "DELETE FROM tags WHERE NOT (tag_id = ANY($1)) RETURNING tag_id",
        )
        .bind(keep)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete tags: {}", e)))?;

        timer.observe_duration();
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn tag_exists(&self, tag_id: &str) -> Result<bool, AppError> {
        self.exists(
            "tag_exists",
            "SELECT EXISTS (SELECT 1 FROM tags WHERE tag_id = $1)",
            tag_id,
        )
        .await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    #[instrument(skip(self))]
    async fn load_snapshot(&self) -> Result<Snapshot, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_snapshot"])
            .start_timer();

        let (accounts, categories, tags) = tokio::try_join!(
            sqlx::query_as::<_, (String, i64)>("SELECT provider_id, account_id FROM accounts")
                .fetch_all(&self.pool),
            sqlx::query_scalar::<_, String>("SELECT category_id FROM categories")
                .fetch_all(&self.pool),
            sqlx::query_scalar::<_, String>("SELECT tag_id FROM tags").fetch_all(&self.pool),
        )
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load snapshot: {}", e)))?;

        timer.observe_duration();

        Ok(Snapshot {
            accounts: accounts.into_iter().collect(),
            categories: categories.into_iter().collect(),
            tags: tags.into_iter().collect(),
        })
    }

    #[instrument(skip(self, rows, derive), fields(rows = rows.len()))]
    async fn write_transactions(
        &self,
        rows: &[TransactionRow],
        actor: &str,
        derive: &FanOutFn<'_>,
    ) -> Result<Vec<WrittenKey>, AppError> {
        let Some(mut builder) = build_upsert(&upsert::TRANSACTIONS, rows, actor) else {
            return Ok(Vec::new());
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&["write_transactions"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let written = builder
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to upsert transactions: {}", e))
            })?
            .into_iter()
            .map(|row| -> Result<WrittenKey, sqlx::Error> {
                Ok(WrittenKey {
                    transaction_id: row.try_get("transaction_id")?,
                    provider_id: row.try_get("provider_id")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to read written keys: {}", e))
            })?;

        let fan_out = match derive(&written) {
            Ok(fan_out) => fan_out,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };

        execute_in_tx(&mut tx, &upsert::TRANSACTION_TAGS, &fan_out.tags, actor).await?;
        execute_in_tx(&mut tx, &upsert::HOLD_INFO, &fan_out.hold_info, actor).await?;
        execute_in_tx(&mut tx, &upsert::ROUND_UPS, &fan_out.round_ups, actor).await?;
        execute_in_tx(&mut tx, &upsert::CASHBACK, &fan_out.cashback, actor).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        record_rows_upserted(upsert::TRANSACTIONS.table, written.len());

        Ok(written)
    }

    #[instrument(skip(self))]
    async fn soft_delete_transaction(
        &self,
        provider_id: &str,
        actor: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["soft_delete_transaction"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET deleted_at = NOW(), updated_at = NOW(), updated_by = $2
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id)
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete transaction: {}", e)))?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn find_transaction_id(&self, provider_id: &str) -> Result<Option<i64>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_transaction_id"])
            .start_timer();

        let id = sqlx::query_scalar::<_, i64>(
            "SELECT transaction_id FROM transactions WHERE provider_id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find transaction: {}", e)))?;

        timer.observe_duration();
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn transaction_ids_by_tag(&self, tag_id: &str) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transaction_ids_by_tag"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT t.provider_id
            FROM transactions t
            INNER JOIN transaction_tags tt ON tt.transaction_id = t.transaction_id
            WHERE tt.tag_id = $1
            "#,
        )
        .bind(tag_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list tagged transactions: {}", e)))?;

        timer.observe_duration();
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn transaction_ids_by_category(
        &self,
        category_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transaction_ids_by_category"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, String>(
            "SELECT provider_id FROM transactions WHERE category_id = $1",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list categorised transactions: {}", e))
        })?;

        timer.observe_duration();
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn link_tag(&self, transaction_id: i64, tag_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO transaction_tags (transaction_id, tag_id)
            VALUES ($1, $2)
            ON CONFLICT (transaction_id, tag_id) DO NOTHING
            "#,
        )
        .bind(transaction_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to tag transaction: {}", e)))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn unlink_tag(&self, transaction_id: i64, tag_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM transaction_tags WHERE transaction_id = $1 AND tag_id = $2")
            .bind(transaction_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to untag transaction: {}", e))
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_transaction_category(
        &self,
        transaction_id: i64,
        category_id: &str,
        actor: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET category_id = $2, updated_at = NOW(), updated_by = $3
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .bind(category_id)
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to categorise transaction: {}", e)))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_transaction_category(
        &self,
        transaction_id: i64,
        category_id: &str,
        actor: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET category_id = NULL, updated_at = NOW(), updated_by = $3
            WHERE transaction_id = $1 AND category_id = $2
            "#,
        )
        .bind(transaction_id)
        .bind(category_id)
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to uncategorise transaction: {}", e))
        })?;

        Ok(result.rows_affected() > 0)
    }
}
