use super::Ingestor;
use crate::models::TagRow;
use crate::provider::resources::TagResource;
use crate::provider::{walk, PageHandler};
use crate::services::store::Store;
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::BTreeSet;
use tracing::{info, instrument};

struct TagPages<'a> {
    store: &'a dyn Store,
    seen: BTreeSet<String>,
}

#[async_trait]
impl<'a> PageHandler<TagResource> for TagPages<'a> {
    async fn handle(&mut self, items: Vec<TagResource>, page: u32) -> Result<(), AppError> {
        info!(page = page, "Processing tags");
        let rows: Vec<TagRow> = items
            .into_iter()
            .map(|t| TagRow { tag_id: t.id })
            .collect();
        self.seen.extend(rows.iter().map(|r| r.tag_id.clone()));

        self.store.upsert_tags(&rows).await?;
        info!(page = page, rows = rows.len(), "Finished processing tags");
        Ok(())
    }
}

impl Ingestor {
    /// Insert new tags, then hard-delete local tags absent from the full
    /// listing. An empty listing deletes nothing.
    #[instrument(skip(self))]
    pub async fn process_tags(&self) -> Result<Vec<String>, AppError> {
        let link = self.client.listing_url("/tags", &[])?;
        let mut pages = TagPages {
            store: self.store.as_ref(),
            seen: BTreeSet::new(),
        };

        walk(&self.client, &link, &mut pages).await?;

        if pages.seen.is_empty() {
            return Ok(Vec::new());
        }

        info!("Deleting orphaned tags");
        let keep: Vec<String> = pages.seen.into_iter().collect();
        let deleted = self.store.delete_tags_not_in(&keep).await?;
        info!(count = deleted.len(), tags = ?deleted, "Deleted orphaned tags");

        Ok(deleted)
    }
}
