//! Cursor-paginated case-data fetcher.
//!
//! Follows the server-supplied `pagination.next` cursor until it is empty,
//! accumulating every page's `data` in page order. A cursor that resolves
//! to an already-visited URL aborts the fetch with
//! [`FetchError::PaginationStalled`] instead of looping.

use std::collections::BTreeSet;

use case_tracker_source_models::{CasePage, CaseRecord};
use reqwest::Url;

use crate::{FetchError, HttpExecutor};

/// Fetches every page of the case listing endpoint.
#[derive(Debug, Clone)]
pub struct RemoteFetcher<E> {
    executor: E,
    base_url: Url,
}

impl<E: HttpExecutor> RemoteFetcher<E> {
    /// Creates a fetcher that resolves cursors against `base_url` (the
    /// API origin, e.g. `https://api.coronavirus.data.gov.uk`).
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(executor: E, base_url: &str) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url).map_err(|e| FetchError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { executor, base_url })
    }

    /// Returns the API origin cursors are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a URL, absolute path or relative cursor against the
    /// API origin.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the result is not a valid URL.
    pub fn resolve(&self, cursor: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(cursor)
            .map_err(|e| FetchError::InvalidUrl {
                url: cursor.to_string(),
                message: e.to_string(),
            })
    }

    /// Fetches all pages starting at `initial_url` and returns the
    /// flattened records in page order.
    ///
    /// Nothing is returned on failure: records from pages that were
    /// already fetched are dropped with the error.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if any page exhausts its retry budget, a
    /// page body is malformed, or pagination stalls.
    pub async fn fetch(&self, initial_url: &str) -> Result<Vec<CaseRecord>, FetchError> {
        let mut url = self.resolve(initial_url)?;
        let mut visited = BTreeSet::from([url.to_string()]);
        let mut records = Vec::new();
        let mut page_num: u32 = 1;

        loop {
            log::info!("Fetching case data page {page_num}: {url}");

            let response = self.executor.get(url.as_str()).await?;
            let page: CasePage =
                serde_json::from_str(&response.body).map_err(|e| FetchError::MalformedResponse {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

            let count = page.data.len();
            records.extend(page.data);
            log::debug!(
                "Page {page_num}: {count} records (total: {})",
                records.len()
            );

            let Some(cursor) = page.pagination.next_cursor() else {
                break;
            };

            let next = self.resolve(cursor)?;
            if !visited.insert(next.to_string()) {
                log::error!("Pagination cursor {cursor} repeats a visited page, aborting");
                return Err(FetchError::PaginationStalled {
                    cursor: cursor.to_string(),
                });
            }

            url = next;
            page_num += 1;
        }

        log::info!(
            "Fetched {} case records across {page_num} pages",
            records.len()
        );

        Ok(records)
    }
}
