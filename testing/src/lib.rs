//! # Webhook Worker Testing
//!
//! In-memory collaborators and fixtures for the webhook delivery worker.
//!
//! This crate provides:
//! - [`InMemoryDeliveryStore`]: transactional store with failure injection
//! - [`channel_source`]: a [`MessageSource`](webhook_worker_core::bus::MessageSource) fed from a test
//! - [`ScriptedSender`]: a webhook sender with queued responses
//! - Deterministic clocks and envelope fixtures
//!
//! ## Example
//!
//! ```ignore
//! use webhook_worker_testing::{InMemoryDeliveryStore, channel_source, fixtures, test_clock};
//!
//! #[tokio::test]
//! async fn queued_message_is_delivered() {
//!     let store = InMemoryDeliveryStore::new()
//!         .with_config(fixtures::webhook_config("ACCOUNT:123", "https://h", "/w", "POST"));
//!     let (feed, source) = channel_source("pix");
//!     feed.publish(fixtures::pix_envelope("123"));
//!     // build an EventIngestor over `source` and `store` ...
//! }
//! ```

use chrono::{DateTime, Utc};
use webhook_worker_core::environment::Clock;

pub mod bus;
pub mod sender;
pub mod store;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use webhook_worker_testing::mocks::FixedClock;
    /// use webhook_worker_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that advances by a fixed step on every reading.
    ///
    /// Gives each ingested message a distinct `created_at`.
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: chrono::Duration,
    }

    impl SteppingClock {
        /// Start at `start`, advancing by `step` after each reading.
        #[must_use]
        pub const fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }
    }

    #[allow(clippy::unwrap_used)]
    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut next = self.next.lock().unwrap();
            let now = *next;
            *next = now + self.step;
            now
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// A [`SteppingClock`] starting at the [`test_clock`] time, one second per reading.
    #[must_use]
    pub fn stepping_clock() -> SteppingClock {
        SteppingClock::new(test_clock().now(), chrono::Duration::seconds(1))
    }
}

/// Envelope and configuration fixtures.
pub mod fixtures {
    use super::{Clock, mocks::test_clock};
    use webhook_worker_core::event::EventKind;
    use webhook_worker_core::model::WebhookConfig;

    /// A `TOPIC:PIX` routing entry for `receiver`.
    #[must_use]
    pub fn webhook_config(receiver: &str, host: &str, url: &str, method: &str) -> WebhookConfig {
        WebhookConfig {
            id: 1,
            receiver: receiver.to_string(),
            kind: EventKind::Pix.tag().to_string(),
            host: host.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            created_at: test_clock().now(),
            updated_at: None,
        }
    }

    /// The PIX body used by [`pix_envelope`], serialized.
    #[must_use]
    pub fn pix_body(account_id: &str) -> serde_json::Value {
        serde_json::json!({
            "transaction_id": format!("tx-{account_id}"),
            "request_id": "req-1",
            "account_from": { "account_id": account_id },
            "account_to": { "account_id": "999" },
            "status": "COMPLETED",
            "currency": "BRL",
            "amount": 10.5
        })
    }

    /// A `TOPIC:PIX` envelope paid from `account_id`.
    #[must_use]
    pub fn pix_envelope(account_id: &str) -> Vec<u8> {
        envelope(EventKind::Pix.tag(), &pix_body(account_id))
    }

    /// An envelope with an arbitrary `type` tag and an empty object body.
    #[must_use]
    pub fn unknown_envelope(tag: &str) -> Vec<u8> {
        envelope(tag, &serde_json::json!({}))
    }

    /// Wrap `payload` in an envelope tagged `tag`.
    #[must_use]
    pub fn envelope(tag: &str, payload: &serde_json::Value) -> Vec<u8> {
        serde_json::json!({ "type": tag, "payload": payload })
            .to_string()
            .into_bytes()
    }
}

// Re-export commonly used items
pub use bus::{ChannelMessageSource, MessageFeed, channel_source};
pub use mocks::{FixedClock, SteppingClock, stepping_clock, test_clock};
pub use sender::ScriptedSender;
pub use store::InMemoryDeliveryStore;
