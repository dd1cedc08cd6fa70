//! Scripted [`HttpExecutor`] for tests.
//!
//! Responses are queued per URL and handed out in order. Once a URL's
//! queue has a single entry left, that entry is repeated for every
//! further request. Unscripted URLs answer HTTP 404.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderName, HeaderValue};

use crate::{FetchError, HttpExecutor, HttpResponse};

/// One scripted outcome for a request.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Respond with this status, body and headers.
    Response {
        /// Status code.
        status: StatusCode,
        /// Body text.
        body: String,
        /// Extra headers.
        headers: Vec<(HeaderName, String)>,
    },
    /// Fail at the transport level.
    TransportError(String),
    /// Sleep before answering with the inner outcome.
    Delayed(Duration, Box<Self>),
}

impl Scripted {
    /// A 200 response with a body.
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Response {
            status: StatusCode::OK,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    /// A response with the given status and an empty body.
    #[must_use]
    pub const fn status(status: StatusCode) -> Self {
        Self::Response {
            status,
            body: String::new(),
            headers: Vec::new(),
        }
    }

    /// Adds a header to a [`Scripted::Response`].
    #[must_use]
    pub fn with_header(self, name: HeaderName, value: &str) -> Self {
        match self {
            Self::Response {
                status,
                body,
                mut headers,
            } => {
                headers.push((name, value.to_string()));
                Self::Response {
                    status,
                    body,
                    headers,
                }
            }
            other => other,
        }
    }
}

/// An [`HttpExecutor`] that replays scripted outcomes.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<BTreeMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    /// Creates an executor with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome for `url`.
    #[must_use]
    pub fn on(self, url: &str, outcome: Scripted) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Returns every URL requested so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of requests made to `url`.
    #[must_use]
    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|u| *u == url).count()
    }

    fn next_outcome(&self, url: &str) -> Option<Scripted> {
        let mut scripts = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let queue = scripts.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(url.to_string());

        let mut outcome = self
            .next_outcome(url)
            .unwrap_or_else(|| Scripted::status(StatusCode::NOT_FOUND));

        loop {
            match outcome {
                Scripted::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
                Scripted::TransportError(message) => {
                    return Err(FetchError::Network {
                        url: url.to_string(),
                        message,
                    });
                }
                Scripted::Response {
                    status,
                    body,
                    headers,
                } => {
                    let mut response = HttpResponse::new(url, status, body);
                    for (name, value) in headers {
                        if let Ok(value) = HeaderValue::from_str(&value) {
                            response.headers.insert(name, value);
                        }
                    }
                    return Ok(response);
                }
            }
        }
    }
}
