//! Cursor-following page walker.

use super::resources::Page;
use super::UpClient;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use tracing::{debug, warn};

/// Receives each page of a listing, in order.
#[async_trait]
pub trait PageHandler<T: Send + 'static>: Send {
    async fn handle(&mut self, items: Vec<T>, page: u32) -> Result<(), AppError>;
}

/// Accumulates every item of a listing.
#[derive(Debug)]
pub struct Collector<T> {
    pub items: Vec<T>,
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[async_trait]
impl<T: Send + 'static> PageHandler<T> for Collector<T> {
    async fn handle(&mut self, items: Vec<T>, _page: u32) -> Result<(), AppError> {
        self.items.extend(items);
        Ok(())
    }
}

/// Walk a listing from its first page. Returns the number of pages handled.
pub async fn walk<T, H>(client: &UpClient, link: &str, handler: &mut H) -> Result<u32, AppError>
where
    T: DeserializeOwned + Send + 'static,
    H: PageHandler<T>,
{
    walk_from(client, link, 1, handler).await
}

/// Walk a listing whose first fetched page is numbered `start_page`.
///
/// Each handler call completes before the next page is requested, and any
/// fetch or handler error ends the walk.
pub async fn walk_from<T, H>(
    client: &UpClient,
    link: &str,
    start_page: u32,
    handler: &mut H,
) -> Result<u32, AppError>
where
    T: DeserializeOwned + Send + 'static,
    H: PageHandler<T>,
{
    let mut next = Some(link.to_string());
    let mut page = start_page.max(1);
    let mut handled = 0;

    while let Some(url) = next {
        let body: Page<T> = client.get(&url).await.map_err(|e| {
            warn!(page = page, error = %e, "Failed to fetch page");
            AppError::from(e)
        })?;

        debug!(page = page, items = body.data.len(), "Fetched page");
        next = body.links.next;

        handler.handle(body.data, page).await?;
        handled += 1;
        page += 1;
    }

    Ok(handled)
}
