//! Persisted entities: routing configuration and delivery records.

use crate::status::DeliveryStatus;
use chrono::{DateTime, Utc};

/// Static routing entry, keyed by `(receiver, kind)`.
///
/// Provisioned outside the worker and read-only to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Primary key
    pub id: i64,
    /// Receiver identifier, e.g. `ACCOUNT:123`
    pub receiver: String,
    /// Event kind tag (the `type` column), e.g. `TOPIC:PIX`
    pub kind: String,
    /// Scheme and authority, e.g. `https://hooks.example.com`
    pub host: String,
    /// Path appended to `host`
    pub url: String,
    /// HTTP method
    pub method: String,
    /// When the entry was provisioned
    pub created_at: DateTime<Utc>,
    /// Last change, if any
    pub updated_at: Option<DateTime<Utc>>,
}

/// A delivery record as built by the ingestor, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeliveryRecord {
    /// Receiver derived from the event body
    pub receiver: String,
    /// Copied from the resolved config; empty when discarded
    pub host: String,
    /// Copied from the resolved config; empty when discarded
    pub url: String,
    /// Copied from the resolved config; empty when discarded
    pub method: String,
    /// Event body bytes as received
    pub payload: Vec<u8>,
    /// `Pending` or `Discarded`
    pub status: DeliveryStatus,
    /// FIFO ordering key for dispatch
    pub created_at: DateTime<Utc>,
}

impl NewDeliveryRecord {
    /// A record queued for delivery to the resolved webhook.
    #[must_use]
    pub fn queued(
        config: &WebhookConfig,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            receiver: config.receiver.clone(),
            host: config.host.clone(),
            url: config.url.clone(),
            method: config.method.clone(),
            payload,
            status: DeliveryStatus::Pending,
            created_at,
        }
    }

    /// A record kept for audit when no webhook is configured for `receiver`.
    #[must_use]
    pub fn discarded(
        receiver: impl Into<String>,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            receiver: receiver.into(),
            host: String::new(),
            url: String::new(),
            method: String::new(),
            payload,
            status: DeliveryStatus::Discarded,
            created_at,
        }
    }

    /// Attach the store-assigned id.
    #[must_use]
    pub fn with_id(self, id: i64) -> DeliveryRecord {
        DeliveryRecord {
            id,
            receiver: self.receiver,
            host: self.host,
            url: self.url,
            method: self.method,
            payload: self.payload,
            status: self.status,
            created_at: self.created_at,
            updated_at: None,
        }
    }
}

/// A unit of delivery work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Assigned by the store at insert; never reused
    pub id: i64,
    /// Receiver identifier
    pub receiver: String,
    /// Target host
    pub host: String,
    /// Target path
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Body to deliver
    pub payload: Vec<u8>,
    /// Current lifecycle state
    pub status: DeliveryStatus,
    /// Insert time
    pub created_at: DateTime<Utc>,
    /// Time of the terminal status update
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// The absolute URL the webhook is sent to.
    #[must_use]
    pub fn target_url(&self) -> String {
        format!("{}{}", self.host, self.url)
    }
}
