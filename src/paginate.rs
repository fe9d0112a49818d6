//! Lazy page walking over list endpoints.
//!
//! A [`Paginator`] is consumed by [`Paginator::into_stream`]; the stream
//! is single-pass. Iterating again means building a new paginator, which
//! starts over from the first page.

use std::pin::Pin;

use async_stream::try_stream;
use futures::{Stream, TryStreamExt};
use serde_json::Value;
use tracing::{trace, warn};

use crate::client::ApiClient;
use crate::error::Result;

/// Largest page size the API accepts
pub const PAGE_MAX: u32 = 100;

/// Stream type for paginated listings
pub type ItemStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Page position for one paginator invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub per_page: u32,
}

impl PageCursor {
    /// Clamp to `page >= 1` and `per_page` in `1..=100`.
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, PAGE_MAX),
        }
    }
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::new(1, PAGE_MAX)
    }
}

/// Builder for a paginated GET over a collection endpoint.
pub struct Paginator {
    client: ApiClient,
    path: String,
    collection_key: String,
    params: Vec<(String, String)>,
    cursor: PageCursor,
    max_pages: Option<u32>,
}

impl Paginator {
    pub fn new(client: ApiClient, path: impl Into<String>, collection_key: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
            collection_key: collection_key.into(),
            params: Vec::new(),
            cursor: PageCursor::default(),
            max_pages: None,
        }
    }

    /// Fixed query parameters sent with every page. Any `page`/`per_page`
    /// entries are replaced by the cursor.
    pub fn params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params
            .into_iter()
            .filter(|(k, _)| k != "page" && k != "per_page")
            .collect();
        self
    }

    pub fn cursor(mut self, cursor: PageCursor) -> Self {
        self.cursor = cursor;
        self
    }

    /// Stop after this many pages have been fetched; `Some(0)` fetches nothing
    pub fn max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Walk pages lazily, yielding every element of the collection array.
    ///
    /// Ends after a short page or when the page cap binds. An error ends
    /// the stream.
    pub fn into_stream(self) -> ItemStream {
        let Paginator {
            client,
            path,
            collection_key,
            params,
            cursor,
            max_pages,
        } = self;

        Box::pin(try_stream! {
            let mut page = cursor.page;
            let mut fetched = 0u32;

            loop {
                if max_pages.is_some_and(|max| fetched >= max) {
                    break;
                }
                let mut query = params.clone();
                query.push(("page".to_string(), page.to_string()));
                query.push(("per_page".to_string(), cursor.per_page.to_string()));

                let mut payload = client.get_json(&path, &query).await?;
                fetched += 1;

                let items = match payload.get_mut(&collection_key).map(Value::take) {
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        warn!("{} in {} response is not an array: {}", collection_key, path, other);
                        Vec::new()
                    }
                    None => Vec::new(),
                };
                let count = items.len();
                trace!("{} page {} returned {} items", path, page, count);

                for item in items {
                    yield item;
                }

                if count < cursor.per_page as usize {
                    break;
                }
                page += 1;
            }
        })
    }

    /// Drain the stream into a vector.
    pub async fn collect_all(self) -> Result<Vec<Value>> {
        self.into_stream().try_collect().await
    }
}
