//! Message bus consumption contract.
//!
//! The ingestor pulls one [`InboundMessage`] at a time from a
//! [`MessageSource`] and acknowledges it only after the delivery record has
//! been committed:
//!
//! ```text
//! recv() ──▶ decode ──▶ resolve ──▶ BEGIN; INSERT; COMMIT ──▶ ack(position)
//!                                          │
//!                                          └── failure: no ack, message is redelivered
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once**: a crash between commit and ack redelivers the message
//! and produces a second delivery record. Sources must not acknowledge on
//! their own.
//!
//! # Implementations
//!
//! - `KafkaMessageSource` (in `webhook-worker-redpanda`): rdkafka consumer with manual commits
//! - `ChannelMessageSource` (in `webhook-worker-testing`): In-memory channel for tests

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur consuming from the bus.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to create the consumer or reach the brokers
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Error receiving the next message
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to commit a consumed offset
    #[error("Commit failed at {position}: {reason}")]
    CommitFailed {
        /// The message whose offset was being committed
        position: MessagePosition,
        /// The reason for failure
        reason: String,
    },
}

/// Where a message sits in the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePosition {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl std::fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Raw payload (a JSON envelope)
    pub payload: Vec<u8>,
    /// Message headers with UTF-8 values
    pub headers: HashMap<String, String>,
    /// Position used to acknowledge the message
    pub position: MessagePosition,
}

/// Pull-based source of bus messages with explicit acknowledgment.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the ingestor can own a
/// `Box<dyn MessageSource>`.
pub trait MessageSource: Send {
    /// Wait for the next message.
    ///
    /// Returns `None` once the source is closed and will yield nothing more.
    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<InboundMessage, BusError>>> + Send + '_>>;

    /// Mark the message at `position`, and everything before it in its
    /// partition, as consumed.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::CommitFailed`] if the offset cannot be committed.
    fn ack<'a>(
        &'a mut self,
        position: &'a MessagePosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>>;
}
