//! Bounded exponential-backoff retry for HTTP requests.
//!
//! [`Retrying`] is a decorator: it wraps any [`HttpExecutor`] and is
//! itself an [`HttpExecutor`] with the same signature, so callers never
//! know whether the executor they hold retries or not.
//!
//! # Usage
//!
//! ```ignore
//! use case_tracker_source::executor::ReqwestExecutor;
//! use case_tracker_source::retry::RetryPolicy;
//!
//! let executor = RetryPolicy::default().wrap(ReqwestExecutor::new()?);
//! let response = executor.get("https://example.org/v1/data").await?;
//! ```
//!
//! # Retry behaviour
//!
//! Transport failures, HTTP 429 and every other non-2xx status are
//! retried. Rate limiting shares the attempt budget and the backoff
//! schedule with other failures instead of escalating on its own. Any
//! non-retryable error from the inner executor is returned immediately.
//! When the budget runs out the result is
//! [`FetchError::RetriesExhausted`] carrying the last cause.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::{FetchError, HttpExecutor, HttpResponse};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 8;

/// Default delay before the first retry.
///
/// With doubling (2s, 4s, ..., 256s) the total wait across
/// [`DEFAULT_MAX_RETRIES`] retries is 510 seconds, inside the default
/// 10-minute overall fetch timeout.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles for each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Total attempts including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Worst-case total time spent sleeping between attempts.
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_retries)
            .map(|retry| self.delay_for(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Wraps `inner` so that every request follows this policy.
    #[must_use]
    pub fn wrap<E: HttpExecutor>(self, inner: E) -> Retrying<E> {
        Retrying {
            inner,
            policy: self,
        }
    }
}

/// An [`HttpExecutor`] decorator that retries failed requests according
/// to a [`RetryPolicy`]. Only 2xx responses are passed through.
#[derive(Debug, Clone)]
pub struct Retrying<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E> Retrying<E> {
    /// Returns the policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the wrapped executor.
    #[must_use]
    pub const fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: HttpExecutor> HttpExecutor for Retrying<E> {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let attempts = self.policy.max_attempts();
        let mut last_error: Option<FetchError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt);
                log::warn!("  retry {attempt}/{} in {delay:?}...", self.policy.max_retries);
                tokio::time::sleep(delay).await;
            }

            let error = match self.inner.get(url).await {
                Ok(response) if response.status.is_success() => return Ok(response),
                Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {
                    FetchError::RateLimited {
                        url: url.to_string(),
                    }
                }
                Ok(response) => FetchError::Network {
                    url: url.to_string(),
                    message: format!("HTTP {}", response.status),
                },
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            log::warn!("  request failed (attempt {}/{attempts}): {error}", attempt + 1);
            last_error = Some(error);
        }

        let last = last_error.unwrap_or_else(|| FetchError::Network {
            url: url.to_string(),
            message: "no attempts were made".to_string(),
        });
        log::error!("Giving up on {url} after {attempts} attempts: {last}");

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last: Box::new(last),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, ScriptedExecutor};

    const URL: &str = "https://api.example.org/v1/data";

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::ZERO)
    }

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::new(4, Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.total_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn default_backoff_fits_in_ten_minutes() {
        assert!(RetryPolicy::default().total_backoff() < Duration::from_secs(600));
    }

    #[tokio::test]
    async fn recovers_from_failures_within_budget() {
        let executor = ScriptedExecutor::new()
            .on(URL, Scripted::TransportError("connection reset".to_string()))
            .on(URL, Scripted::status(StatusCode::BAD_GATEWAY))
            .on(URL, Scripted::ok("{}"));
        let retrying = instant(3).wrap(executor);

        let response = retrying.get(URL).await.unwrap();

        assert_eq!(response.body, "{}");
        assert_eq!(retrying.inner().request_count(URL), 3);
    }

    #[tokio::test]
    async fn exhausting_budget_is_fatal() {
        let executor =
            ScriptedExecutor::new().on(URL, Scripted::status(StatusCode::INTERNAL_SERVER_ERROR));
        let retrying = instant(2).wrap(executor);

        let err = retrying.get(URL).await.unwrap_err();

        match err {
            FetchError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Network { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(retrying.inner().request_count(URL), 3);
    }

    #[tokio::test]
    async fn rate_limiting_is_retried_and_counts_toward_budget() {
        let executor = ScriptedExecutor::new()
            .on(URL, Scripted::status(StatusCode::TOO_MANY_REQUESTS))
            .on(URL, Scripted::ok("done"));
        let retrying = instant(1).wrap(executor);
        assert_eq!(retrying.get(URL).await.unwrap().body, "done");

        let always_limited =
            ScriptedExecutor::new().on(URL, Scripted::status(StatusCode::TOO_MANY_REQUESTS));
        let retrying = instant(1).wrap(always_limited);
        let err = retrying.get(URL).await.unwrap_err();
        match err {
            FetchError::RetriesExhausted { last, .. } => {
                assert!(matches!(*last, FetchError::RateLimited { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_retried_too() {
        let executor = ScriptedExecutor::new()
            .on(URL, Scripted::status(StatusCode::NOT_FOUND))
            .on(URL, Scripted::ok("found"));
        let retrying = instant(2).wrap(executor);

        assert_eq!(retrying.get(URL).await.unwrap().body, "found");
    }
}
