//! Durable point stores.
//!
//! The pipeline hands a complete run's points to a [`TimeSeriesSink`] in a
//! single call. Bucket creation and retention are the store's concern.
//!
//! [`InfluxSink`] splits a call into batches and retries each batch on
//! transport errors, 429 and 5xx. A batch that still fails after earlier
//! batches were stored yields [`SinkError::Partial`], which carries the
//! number of points the store already holds.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use case_tracker_source::retry::RetryPolicy;
use reqwest::StatusCode;

use crate::NormalizedPoint;
use crate::line_protocol;

/// Points per HTTP write request.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Errors that can occur while writing points.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Write rejected with HTTP {status}: {message}")]
    Rejected {
        /// Response status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// I/O error (file sink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A batch failed after earlier batches were stored.
    #[error("Write failed after {written} of {total} points were stored: {source}")]
    Partial {
        /// Points the store accepted before the failure.
        written: usize,
        /// Points in the write call.
        total: usize,
        /// Failure of the batch that was not stored.
        source: Box<SinkError>,
    },
}

impl SinkError {
    /// Points stored before the failure. Zero unless this is
    /// [`SinkError::Partial`].
    #[must_use]
    pub const fn points_written(&self) -> usize {
        match self {
            Self::Partial { written, .. } => *written,
            Self::Http(_) | Self::Rejected { .. } | Self::Io(_) => 0,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Rejected { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(status)
            }
            Self::Io(_) | Self::Partial { .. } => false,
        }
    }
}

/// A durable store for [`NormalizedPoint`]s.
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Writes all points. Returns the number written.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the store rejects the write. Sinks that
    /// write in several requests report stored points through
    /// [`SinkError::points_written`].
    async fn write(&self, points: &[NormalizedPoint]) -> Result<usize, SinkError>;
}

/// Writes line protocol to an `InfluxDB` v2 `/api/v2/write` endpoint.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    url: String,
    org: String,
    bucket: String,
    token: String,
    batch_size: usize,
    retry: RetryPolicy,
}

impl InfluxSink {
    /// Creates a sink for `url` (server root, e.g. `http://localhost:8086`).
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            org: org.into(),
            bucket: bucket.into(),
            token: token.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the number of points per request.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Overrides the per-batch retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn write_url(&self) -> String {
        format!("{}/api/v2/write", self.url.trim_end_matches('/'))
    }

    async fn post(&self, url: &str, body: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .post(url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "s"),
            ])
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.token),
            )
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    async fn post_with_retry(&self, url: &str, body: &str) -> Result<(), SinkError> {
        let attempts = self.retry.max_attempts();
        let mut attempt = 1;

        loop {
            match self.post(url, body).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "  write failed (attempt {attempt}/{attempts}): {e}, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl TimeSeriesSink for InfluxSink {
    async fn write(&self, points: &[NormalizedPoint]) -> Result<usize, SinkError> {
        let url = self.write_url();
        let mut written = 0;

        for (batch_num, batch) in points.chunks(self.batch_size).enumerate() {
            let body = line_protocol::encode_all(batch);
            if let Err(e) = self.post_with_retry(&url, &body).await {
                if written == 0 {
                    return Err(e);
                }
                log::error!(
                    "Batch {batch_num} failed with {written} of {} points already stored",
                    points.len()
                );
                return Err(SinkError::Partial {
                    written,
                    total: points.len(),
                    source: Box::new(e),
                });
            }

            written += batch.len();
            log::debug!("Wrote batch {batch_num} ({} points)", batch.len());
        }

        log::info!("Wrote {written} points to {}/{}", self.org, self.bucket);
        Ok(written)
    }
}

/// Writes line protocol to a local file, replacing its contents.
#[derive(Debug, Clone)]
pub struct LineProtocolFileSink {
    path: PathBuf,
}

impl LineProtocolFileSink {
    /// Creates a sink writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TimeSeriesSink for LineProtocolFileSink {
    async fn write(&self, points: &[NormalizedPoint]) -> Result<usize, SinkError> {
        let mut text = line_protocol::encode_all(points);
        if !text.is_empty() {
            text.push('\n');
        }
        tokio::fs::write(&self.path, text).await?;
        log::info!("Wrote {} points to {}", points.len(), self.path.display());
        Ok(points.len())
    }
}

/// Keeps points in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    points: Mutex<Vec<NormalizedPoint>>,
    writes: Mutex<usize>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All points written so far.
    #[must_use]
    pub fn points(&self) -> Vec<NormalizedPoint> {
        self.points
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of `write` calls received.
    #[must_use]
    pub fn write_count(&self) -> usize {
        *self
            .writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl TimeSeriesSink for MemorySink {
    async fn write(&self, points: &[NormalizedPoint]) -> Result<usize, SinkError> {
        self.points
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(points);
        *self
            .writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) += 1;
        Ok(points.len())
    }
}
