//! reqwest implementation of [`WebhookSender`].
//!
//! [`ReqwestSender`] performs one HTTP call per [`DeliveryRequest`] and
//! reports either the response status code or a [`DeliveryError`]. It does not
//! read the response body and never retries; classification of the outcome
//! belongs to the dispatch loop.
//!
//! # Example
//!
//! ```ignore
//! use webhook_worker_http::ReqwestSender;
//!
//! let sender = ReqwestSender::builder()
//!     .user_agent("webhook-worker/0.1")
//!     .build()?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use reqwest::{Client, Method};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use webhook_worker_core::delivery::{DeliveryError, DeliveryRequest, WebhookSender};

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("webhook-worker/", env!("CARGO_PKG_VERSION"));

/// Outbound webhook client backed by a shared [`reqwest::Client`].
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct ReqwestSender {
    client: Client,
}

impl ReqwestSender {
    /// Create a sender with default client settings.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Transport`] if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, DeliveryError> {
        Self::builder().build()
    }

    /// Wrap an already configured client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Start building a sender.
    #[must_use]
    pub fn builder() -> ReqwestSenderBuilder {
        ReqwestSenderBuilder::default()
    }

    async fn execute(&self, request: DeliveryRequest) -> Result<u16, DeliveryError> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            DeliveryError::InvalidRequest(format!("invalid HTTP method: {:?}", request.method))
        })?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(&e, request.timeout))?;

        Ok(response.status().as_u16())
    }
}

impl WebhookSender for ReqwestSender {
    fn send(
        &self,
        request: DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, DeliveryError>> + Send + '_>> {
        Box::pin(async move {
            let delivery_id = request.delivery_id;
            let result = self.execute(request).await;
            match &result {
                Ok(status) => tracing::debug!(delivery_id, status, "Webhook responded"),
                Err(e) => tracing::debug!(delivery_id, error = %e, "Webhook call failed"),
            }
            result
        })
    }
}

fn classify(error: &reqwest::Error, timeout: Duration) -> DeliveryError {
    if error.is_timeout() {
        return DeliveryError::Timeout(timeout);
    }
    if error.is_builder() {
        return DeliveryError::InvalidRequest(error.to_string());
    }
    if error.is_connect() {
        return DeliveryError::Transport(format!("connection failed: {error}"));
    }
    DeliveryError::Transport(error.to_string())
}

/// Builder for [`ReqwestSender`].
#[derive(Debug, Default)]
pub struct ReqwestSenderBuilder {
    user_agent: Option<String>,
    connect_timeout: Option<Duration>,
}

impl ReqwestSenderBuilder {
    /// Set the `User-Agent` header (default: [`DEFAULT_USER_AGENT`]).
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Bound the TCP/TLS connect phase separately from the per-call timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build the sender.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Transport`] if the client cannot be built.
    pub fn build(self) -> Result<ReqwestSender, DeliveryError> {
        let mut builder = Client::builder()
            .user_agent(self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()));
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| DeliveryError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(ReqwestSender::with_client(client))
    }
}
