//! The request-executor seam.
//!
//! [`HttpExecutor`] is a single "URL in, response out" operation. Retry,
//! pagination and change detection are all written against this trait,
//! so decorators like [`crate::retry::Retrying`] compose over any
//! executor, including the scripted ones used in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::FetchError;

/// Per-request timeout for the production client. The overall fetch
/// budget is enforced separately by the caller.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final request URL.
    pub url: String,
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Builds a response with no headers.
    #[must_use]
    pub fn new(url: impl Into<String>, status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &reqwest::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Executes a GET request and returns the response.
///
/// Implementations return `Ok` for every response that arrived, whatever
/// its status; interpreting the status is the caller's (or a decorator's)
/// job. Transport failures are reported as [`FetchError::Network`].
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Issues a GET request to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the request could not be completed.
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

#[async_trait]
impl<T: HttpExecutor + ?Sized> HttpExecutor for Arc<T> {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        (**self).get(url).await
    }
}

/// [`HttpExecutor`] backed by a [`reqwest::Client`] with gzip decoding
/// and a JSON `Accept` header.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    /// Builds the production client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the TLS backend cannot be
    /// initialized.
    pub fn new() -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .gzip(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let network = |e: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(network)?;
        let final_url = response.url().to_string();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(network)?;

        Ok(HttpResponse {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}
