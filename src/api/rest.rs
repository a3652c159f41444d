//! Fetching paginated collections over the REST wire contract.
//!
//! List endpoints take `page` (1-based) and `take` query parameters and
//! answer `{data: [...], meta: {currentPage, totalPages, itemsPerPage,
//! totalItems}}`. Unpaginated endpoints answer a bare array, which is
//! treated as a single page.

use async_trait::async_trait;
use serde_json::Value;

use crate::query::{Page, PageMeta, QueryKey};

use super::{ApiClient, FetchError};

/// Loads one page of a collection. Called once per cache fetch.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the page `key` points at.
    async fn fetch_page(&self, key: &QueryKey) -> Result<Page, FetchError>;

    /// Other resources whose invalidation should also invalidate `key`.
    fn dependencies(&self, _key: &QueryKey) -> Vec<String> {
        Vec::new()
    }
}

/// [`PageFetcher`] issuing `GET /<resource>` through an [`ApiClient`].
#[derive(Clone)]
pub struct RestPageFetcher {
    client: ApiClient,
    depends_on: Vec<String>,
}

impl RestPageFetcher {
    /// Fetcher with no extra dependencies.
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            depends_on: Vec::new(),
        }
    }

    /// Declares that collections fetched through this fetcher also go
    /// stale when `resource` is mutated.
    pub fn depends_on(mut self, resource: impl Into<String>) -> Self {
        self.depends_on.push(resource.into());
        self
    }
}

#[async_trait]
impl PageFetcher for RestPageFetcher {
    async fn fetch_page(&self, key: &QueryKey) -> Result<Page, FetchError> {
        let endpoint = format!("/{}", key.resource.trim_start_matches('/'));
        let body = self.client.get(&endpoint, key.query_pairs()).await?;
        decode_page(body)
    }

    fn dependencies(&self, _key: &QueryKey) -> Vec<String> {
        self.depends_on.clone()
    }
}

/// Decodes a list response body into a [`Page`].
pub fn decode_page(body: Value) -> Result<Page, FetchError> {
    match body {
        Value::Array(items) => {
            let len = items.len();
            let data = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(rec) => Ok(rec),
                    other => Err(FetchError::network(format!("malformed list item: {other}"))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                data,
                meta: PageMeta::single_page(len),
            })
        }
        other => serde_json::from_value::<Page>(other)
            .map_err(|e| FetchError::network(format!("malformed page: {e}"))),
    }
}
