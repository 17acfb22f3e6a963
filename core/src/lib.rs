//! # Webhook Worker Core
//!
//! Domain types and collaborator traits for a worker that turns bus events
//! into outbound webhooks.
//!
//! ## Architecture
//!
//! ```text
//! bus message ──▶ EventIngestor ──▶ DeliveryStore (write)
//!                                         │
//!                                         ▼
//!                  DispatchLoop  ◀── DeliveryStore (read)
//!                       │
//!                       ▼
//!                 WebhookSender ──▶ DeliveryStore (write)
//! ```
//!
//! The two loops never talk to each other. The store is their only shared
//! state, and its transactions are the only synchronization between them.
//!
//! ## Modules
//!
//! - [`event`]: Inbound envelope, [`event::EventKind`] and typed bodies
//! - [`status`]: [`status::DeliveryStatus`] state machine and its text form
//! - [`model`]: [`model::WebhookConfig`] and [`model::DeliveryRecord`]
//! - [`store`]: [`store::ConfigResolver`], [`store::DeliveryStore`], [`store::StoreTransaction`]
//! - [`bus`]: [`bus::MessageSource`] with explicit acknowledgment
//! - [`delivery`]: [`delivery::WebhookSender`] and [`delivery::DeliveryRequest`]
//! - [`correlation`]: Per-message correlation id
//! - [`environment`]: [`environment::Clock`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod correlation;
pub mod delivery;
pub mod event;
pub mod model;
pub mod status;
pub mod store;

/// Injected environment dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use webhook_worker_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use bus::{BusError, InboundMessage, MessagePosition, MessageSource};
pub use delivery::{DeliveryError, DeliveryRequest, WebhookSender};
pub use event::{DomainEvent, Envelope, EventKind};
pub use model::{DeliveryRecord, NewDeliveryRecord, WebhookConfig};
pub use status::{DeliveryStatus, FailureCode};
pub use store::{ConfigResolver, DeliveryStore, StoreError, StoreTransaction};
