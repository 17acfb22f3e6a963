//! Outbound HTTP delivery contract.
//!
//! The dispatch loop builds a [`DeliveryRequest`] from a pending record and
//! hands it to a [`WebhookSender`]. The sender only reports what happened on
//! the wire; turning that into a stored status is
//! [`DeliveryStatus::from_outcome`](crate::status::DeliveryStatus::from_outcome).
//!
//! # Implementations
//!
//! - `ReqwestSender` (in `webhook-worker-http`): Production implementation
//! - `ScriptedSender` (in `webhook-worker-testing`): Queued responses for tests

use crate::model::DeliveryRecord;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Content type sent with every webhook body.
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Transport-level failures of a delivery attempt.
///
/// A non-200 response is not an error here: the sender returns the status
/// code and the caller classifies it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// No response within the per-call timeout.
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, DNS, TLS or protocol failure before a response arrived.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The stored routing fields do not form a valid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// A single outbound webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    /// Id of the record being delivered, for logging.
    pub delivery_id: i64,
    /// Absolute URL (`host + url` of the record).
    pub url: String,
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Body: the stored payload bytes, unchanged.
    pub body: Vec<u8>,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl DeliveryRequest {
    /// Build the request for a pending record.
    #[must_use]
    pub fn for_record(record: &DeliveryRecord, timeout: Duration) -> Self {
        Self {
            delivery_id: record.id,
            url: record.target_url(),
            method: record.method.clone(),
            headers: vec![("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string())],
            body: record.payload.clone(),
            timeout,
        }
    }
}

/// Performs outbound webhook HTTP calls.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the dispatch loop can hold
/// an `Arc<dyn WebhookSender>`.
pub trait WebhookSender: Send + Sync {
    /// Send the request and return the response status code.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] when no response was received.
    fn send(
        &self,
        request: DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, DeliveryError>> + Send + '_>>;
}
