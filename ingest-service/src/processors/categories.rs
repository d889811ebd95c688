use super::Ingestor;
use crate::models::CategoryRow;
use crate::provider::resources::CategoryResource;
use crate::provider::{walk, PageHandler};
use crate::services::store::Store;
use async_trait::async_trait;
use service_core::error::AppError;
use tracing::{debug, info, instrument};

struct CategoryPages<'a> {
    store: &'a dyn Store,
    /// `(child, parent)` edges, applied once every category row exists.
    edges: Vec<(String, String)>,
}

#[async_trait]
impl<'a> PageHandler<CategoryResource> for CategoryPages<'a> {
    async fn handle(&mut self, items: Vec<CategoryResource>, page: u32) -> Result<(), AppError> {
        info!(page = page, "Processing categories");
        let rows: Vec<CategoryRow> = items
            .iter()
            .map(|c| CategoryRow {
                category_id: c.id.clone(),
                category_name: c.attributes.name.clone(),
            })
            .collect();
        self.store.upsert_categories(&rows).await?;

        for parent in items
            .iter()
            .filter(|c| !c.relationships.children.data.is_empty())
        {
            self.edges.extend(
                parent
                    .relationships
                    .children
                    .data
                    .iter()
                    .map(|child| (child.id.clone(), parent.id.clone())),
            );
        }

        info!(page = page, rows = rows.len(), "Finished processing categories");
        Ok(())
    }
}

impl Ingestor {
    /// Refresh category names, then point each child at its parent.
    #[instrument(skip(self))]
    pub async fn process_categories(&self) -> Result<u32, AppError> {
        let link = self.client.listing_url("/categories", &[])?;
        let mut pages = CategoryPages {
            store: self.store.as_ref(),
            edges: Vec::new(),
        };

        let page_count = walk(&self.client, &link, &mut pages).await?;

        info!("Processing category relationships");
        let mut reassigned = 0;
        for (child, parent) in &pages.edges {
            if self.store.assign_category_parent(child, parent).await? {
                debug!(child = %child, parent = %parent, "Category parent assigned");
                reassigned += 1;
            }
        }
        info!(
            relationships = pages.edges.len(),
            reassigned = reassigned,
            "Finished processing category relationships"
        );

        Ok(page_count)
    }
}
