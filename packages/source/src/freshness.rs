//! Change detection via the listing endpoint's `Last-Modified` header.

use reqwest::header::LAST_MODIFIED;

use crate::{FetchError, HttpExecutor};

/// Decides whether the remote data changed since the last check.
///
/// The freshness token is the raw `Last-Modified` header value, compared
/// as an opaque string. State lives in the instance; hosts that want to
/// carry it across runs seed it with [`ChangeDetector::with_token`].
#[derive(Debug, Clone)]
pub struct ChangeDetector<E> {
    executor: E,
    url: String,
    last_token: Option<String>,
}

impl<E: HttpExecutor> ChangeDetector<E> {
    /// Creates a detector that has not seen any token yet, so the first
    /// successful check reports a change.
    #[must_use]
    pub fn new(executor: E, url: impl Into<String>) -> Self {
        Self {
            executor,
            url: url.into(),
            last_token: None,
        }
    }

    /// Seeds the detector with a previously observed token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.last_token = Some(token.into());
        self
    }

    /// Returns the last observed freshness token.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.last_token.as_deref()
    }

    /// Replaces the stored token, e.g. to roll back after a failed
    /// ingestion so the next check reports the change again.
    pub fn set_token(&mut self, token: Option<String>) {
        self.last_token = token;
    }

    /// Requests the listing endpoint and compares its freshness token to
    /// the stored one.
    ///
    /// Returns `false` and leaves state untouched when the token is
    /// unchanged. Otherwise stores the new token and returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::FreshnessUnavailable`] if the response has no
    /// `Last-Modified` header, [`FetchError::Network`] for a non-success
    /// status, or any error from the request itself.
    pub async fn has_changed(&mut self) -> Result<bool, FetchError> {
        let response = self.executor.get(&self.url).await?;
        if !response.status.is_success() {
            return Err(FetchError::Network {
                url: self.url.clone(),
                message: format!("HTTP {}", response.status),
            });
        }

        let token = response
            .header(&LAST_MODIFIED)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FetchError::FreshnessUnavailable {
                url: self.url.clone(),
                header: "Last-Modified",
            })?;

        if self.last_token.as_deref() == Some(token) {
            log::debug!("Data unchanged since {token}");
            return Ok(false);
        }

        log::info!(
            "Data changed: {} -> {token}",
            self.last_token.as_deref().unwrap_or("<none>")
        );
        self.last_token = Some(token.to_string());

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::testing::{Scripted, ScriptedExecutor};

    const URL: &str = "https://api.example.org/v1/data?page=1";
    const MONDAY: &str = "Mon, 02 Nov 2020 16:00:00 GMT";
    const TUESDAY: &str = "Tue, 03 Nov 2020 16:00:00 GMT";

    fn modified(token: &str) -> Scripted {
        Scripted::ok("{}").with_header(LAST_MODIFIED, token)
    }

    #[tokio::test]
    async fn first_check_reports_change() {
        let executor = ScriptedExecutor::new().on(URL, modified(MONDAY));
        let mut detector = ChangeDetector::new(executor, URL);

        assert!(detector.has_changed().await.unwrap());
        assert_eq!(detector.token(), Some(MONDAY));
    }

    #[tokio::test]
    async fn unchanged_token_returns_false() {
        let executor = ScriptedExecutor::new().on(URL, modified(MONDAY));
        let mut detector = ChangeDetector::new(executor, URL);

        assert!(detector.has_changed().await.unwrap());
        assert!(!detector.has_changed().await.unwrap());
        assert_eq!(detector.token(), Some(MONDAY));
    }

    #[tokio::test]
    async fn changed_token_returns_true_and_updates_state() {
        let executor = ScriptedExecutor::new()
            .on(URL, modified(MONDAY))
            .on(URL, modified(TUESDAY));
        let mut detector = ChangeDetector::new(executor, URL).with_token(MONDAY);

        assert!(!detector.has_changed().await.unwrap());
        assert_eq!(detector.token(), Some(MONDAY));
        assert!(detector.has_changed().await.unwrap());
        assert_eq!(detector.token(), Some(TUESDAY));
    }

    #[tokio::test]
    async fn missing_header_is_an_error_and_keeps_state() {
        let executor = ScriptedExecutor::new().on(URL, Scripted::ok("{}"));
        let mut detector = ChangeDetector::new(executor, URL).with_token(MONDAY);

        let err = detector.has_changed().await.unwrap_err();

        assert!(matches!(err, FetchError::FreshnessUnavailable { .. }));
        assert_eq!(detector.token(), Some(MONDAY));
    }

    #[tokio::test]
    async fn request_failure_propagates() {
        let executor = ScriptedExecutor::new().on(URL, Scripted::status(StatusCode::BAD_GATEWAY));
        let mut detector = ChangeDetector::new(executor, URL);

        let err = detector.has_changed().await.unwrap_err();

        assert!(matches!(err, FetchError::Network { .. }));
        assert!(detector.token().is_none());
    }

    #[tokio::test]
    async fn rolled_back_token_reports_change_again() {
        let executor = ScriptedExecutor::new().on(URL, modified(TUESDAY));
        let mut detector = ChangeDetector::new(executor, URL).with_token(MONDAY);

        assert!(detector.has_changed().await.unwrap());
        detector.set_token(Some(MONDAY.to_string()));
        assert!(detector.has_changed().await.unwrap());
    }
}
