use super::Ingestor;
use crate::models::{actor, AccountRow};
use crate::provider::resources::AccountResource;
use crate::provider::{walk, PageHandler};
use crate::services::store::Store;
use async_trait::async_trait;
use service_core::error::AppError;
use tracing::{info, instrument};

fn account_row(resource: AccountResource) -> AccountRow {
    let attributes = resource.attributes;
    AccountRow {
        provider_id: resource.id,
        account_type: attributes.account_type,
        ownership_type: attributes.ownership_type,
        display_name: attributes.display_name,
        currency_code: attributes.balance.currency_code,
        value: attributes.balance.value,
        value_in_base_units: attributes.balance.value_in_base_units,
        created_at: attributes.created_at,
    }
}

struct AccountPages<'a> {
    store: &'a dyn Store,
    seen: Vec<String>,
}

#[async_trait]
impl<'a> PageHandler<AccountResource> for AccountPages<'a> {
    async fn handle(&mut self, items: Vec<AccountResource>, page: u32) -> Result<(), AppError> {
        info!(page = page, "Processing accounts");
        let rows: Vec<AccountRow> = items.into_iter().map(account_row).collect();
        self.seen.extend(rows.iter().map(|r| r.provider_id.clone()));

        self.store.upsert_accounts(&rows, actor::ACCOUNTS).await?;
        info!(page = page, rows = rows.len(), "Finished processing accounts");
        Ok(())
    }
}

impl Ingestor {
    /// Refresh every account, then soft-delete local accounts the provider no
    /// longer lists. Deletion only follows a walk that reached the last page.
    #[instrument(skip(self))]
    pub async fn process_accounts(&self) -> Result<u32, AppError> {
        let link = self.client.listing_url("/accounts", &[])?;
        let mut pages = AccountPages {
            store: self.store.as_ref(),
            seen: Vec::new(),
        };

        let page_count = walk(&self.client, &link, &mut pages).await?;

        if !pages.seen.is_empty() {
            let deleted = self
                .store
                .soft_delete_accounts_not_in(&pages.seen, actor::ACCOUNTS)
                .await?;
            if deleted > 0 {
                info!(deleted = deleted, "Soft-deleted accounts missing from provider");
            }
        }

        info!(pages = page_count, accounts = pages.seen.len(), "Accounts synchronised");
        Ok(page_count)
    }
}
