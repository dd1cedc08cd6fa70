#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Resilient fetching from the case-data API.
//!
//! Every request goes through an [`HttpExecutor`]. The production
//! executor ([`executor::ReqwestExecutor`]) is wrapped in a
//! [`retry::Retrying`] decorator that applies a bounded exponential
//! backoff, and the wrapped executor is shared by the paginated case
//! fetcher ([`paginated::RemoteFetcher`]), the facility observation fetch
//! ([`observations`]) and the change detector ([`freshness::ChangeDetector`]).

pub mod executor;
pub mod freshness;
pub mod observations;
pub mod paginated;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::time::Duration;

pub use executor::{HttpExecutor, HttpResponse};

/// Errors that can occur while fetching from the remote API.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport failure or non-success status (other than 429).
    /// Retryable.
    #[error("Network error fetching {url}: {message}")]
    Network {
        /// Request URL.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// The server answered HTTP 429. Retryable with the same backoff.
    #[error("Rate limited fetching {url}")]
    RateLimited {
        /// Request URL.
        url: String,
    },

    /// The retry budget was exhausted. Fatal for the whole fetch.
    #[error("Fetching {url} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Request URL.
        url: String,
        /// Number of attempts made, including the first.
        attempts: u32,
        /// Cause of the final failed attempt.
        last: Box<Self>,
    },

    /// The response body could not be parsed into the expected shape.
    /// Fatal, never retried.
    #[error("Malformed response from {url}: {message}")]
    MalformedResponse {
        /// Request URL.
        url: String,
        /// Parse error description.
        message: String,
    },

    /// The server handed back a cursor that was already visited.
    #[error("Pagination stalled: cursor {cursor} was already visited")]
    PaginationStalled {
        /// The repeated cursor.
        cursor: String,
    },

    /// A URL or cursor could not be resolved against the API origin.
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl {
        /// The offending URL or cursor.
        url: String,
        /// Parse error description.
        message: String,
    },

    /// The overall wall-clock budget for the fetch elapsed.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The response carried no usable freshness header.
    #[error("Response from {url} has no usable {header} header")]
    FreshnessUnavailable {
        /// Request URL.
        url: String,
        /// Header that was expected.
        header: &'static str,
    },

    /// The HTTP client could not be constructed.
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    /// Returns `true` for failures the retry policy should absorb.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::RateLimited { .. })
    }
}
