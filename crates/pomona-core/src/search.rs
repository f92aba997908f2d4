//! Paging through a remote search endpoint.
//!
//! Pages of [`PAGE_SIZE`] items are requested sorted by remote id ascending,
//! advancing `start` by the page size. The remote catalog may change while
//! we page, so:
//!
//! - items already seen on an earlier page are filtered out (inserts shift
//!   later items back by one position)
//! - a page that is byte-identical to the previous one means the remote side
//!   ignores `start`; this fails with `SearchError` instead of looping
//! - a page without new items ends the search

use std::collections::HashSet;

use serde_json::Value;

use crate::error::AppError;
use crate::family::RemoteApi;
use crate::models::PackageSummary;
use crate::traits::ContentFetcher;

/// Number of items requested per search page.
pub const PAGE_SIZE: usize = 100;

/// Exhaustive, deduplicating search over one remote catalog.
pub struct DatasetSearch<'a, F: ContentFetcher> {
    fetcher: &'a F,
    api: &'a RemoteApi,
    credential: Option<&'a str>,
}

impl<'a, F: ContentFetcher> DatasetSearch<'a, F> {
    pub fn new(fetcher: &'a F, api: &'a RemoteApi, credential: Option<&'a str>) -> Self {
        Self {
            fetcher,
            api,
            credential,
        }
    }

    /// Returns every item matching `filters`, each id at most once, in the
    /// order first seen.
    ///
    /// # Errors
    ///
    /// `AppError::SearchError` when a page cannot be fetched or decoded, an
    /// item has no id, or paging stalls.
    pub async fn search(&self, filters: &[String]) -> Result<Vec<PackageSummary>, AppError> {
        let shape = self.api.family().response_shape();
        let mut seen: HashSet<String> = HashSet::new();
        let mut summaries = Vec::new();
        let mut previous: Option<Vec<u8>> = None;
        let mut start = 0;

        loop {
            let url = self.api.search_url(start, PAGE_SIZE, filters)?;
            tracing::debug!(url = %url, "Searching remote catalog");

            let content = self
                .fetcher
                .fetch(&url, self.credential)
                .await
                .map_err(|e| {
                    AppError::SearchError(format!(
                        "Error sending request to search remote catalog {} using URL {}: {}",
                        self.api.base_url(),
                        url,
                        e
                    ))
                })?;

            if previous.as_deref() == Some(content.as_slice()) {
                return Err(AppError::SearchError(format!(
                    "Paging doesn't seem to work: identical pages at start={} from {}",
                    start, url
                )));
            }

            let response: Value = serde_json::from_slice(&content).map_err(|e| {
                AppError::SearchError(format!("Response from remote catalog was not JSON: {}", e))
            })?;
            let items = shape.items(&response).map_err(|e| {
                AppError::SearchError(format!("Unexpected search response from {}: {}", url, e))
            })?;

            let mut fresh = Vec::with_capacity(items.len());
            for item in items {
                let summary = PackageSummary::from_value(item).ok_or_else(|| {
                    AppError::SearchError(format!("Search result without an id from {}", url))
                })?;
                if seen.insert(summary.id.clone()) {
                    fresh.push(summary);
                } else {
                    tracing::debug!(id = summary.id, "Dropping item already seen on an earlier page");
                }
            }

            if fresh.is_empty() {
                break;
            }

            summaries.extend(fresh);
            previous = Some(content);
            start += PAGE_SIZE;
        }

        tracing::debug!(
            source = self.api.base_url(),
            count = summaries.len(),
            "Search complete"
        );
        Ok(summaries)
    }
}
