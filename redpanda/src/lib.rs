//! Kafka-compatible message source for the webhook worker.
//!
//! [`KafkaMessageSource`] implements [`MessageSource`] over an rdkafka
//! [`StreamConsumer`]. It works against Redpanda, Apache Kafka, AWS MSK and
//! anything else that speaks the Kafka protocol.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - `enable.auto.commit` is off; nothing is committed until [`MessageSource::ack`]
//! - `ack` commits `offset + 1` for the message's partition, which also covers
//!   every earlier offset in that partition
//! - A message received but never acknowledged is redelivered after a restart
//!   or a consumer group rebalance
//!
//! # Example
//!
//! ```no_run
//! use webhook_worker_redpanda::KafkaMessageSource;
//! use webhook_worker_core::bus::MessageSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut source = KafkaMessageSource::builder()
//!     .brokers("localhost:9092")
//!     .group_id("webhook-worker")
//!     .topics(["topic.pix"])
//!     .connect()
//!     .await?;
//!
//! while let Some(Ok(message)) = source.recv().await {
//!     // ... persist ...
//!     source.ack(&message.position).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use webhook_worker_core::bus::{BusError, InboundMessage, MessagePosition, MessageSource};

/// Default consumer group when none is configured.
pub const DEFAULT_GROUP_ID: &str = "webhook-worker";

/// Kafka consumer with explicit, post-commit acknowledgment.
pub struct KafkaMessageSource {
    consumer: Arc<StreamConsumer>,
    topics: Vec<String>,
    metadata_timeout: Duration,
}

impl KafkaMessageSource {
    /// Create a new builder for configuring the source.
    #[must_use]
    pub fn builder() -> KafkaMessageSourceBuilder {
        KafkaMessageSourceBuilder::default()
    }

    /// Subscribed topics.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Check that the brokers answer a metadata request.
    ///
    /// Creating a consumer does not contact the cluster, so startup calls
    /// this to fail fast when the bus is unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if no broker answers within the
    /// metadata timeout.
    pub async fn probe(&self) -> Result<(), BusError> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.metadata_timeout;

        tokio::task::spawn_blocking(move || consumer.fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| BusError::ConnectionFailed(format!("Metadata probe aborted: {e}")))?
            .map_err(|e| BusError::ConnectionFailed(format!("Brokers unreachable: {e}")))
    }

    fn commit(&self, position: &MessagePosition) -> Result<(), BusError> {
        let commit_failed = |reason: String| BusError::CommitFailed {
            position: position.clone(),
            reason,
        };

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.offset + 1),
            )
            .map_err(|e| commit_failed(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| commit_failed(e.to_string()))
    }
}

impl std::fmt::Debug for KafkaMessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaMessageSource")
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|header| {
                    let value = std::str::from_utf8(header.value?).ok()?;
                    Some((header.key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    InboundMessage {
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
        position: MessagePosition {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        },
    }
}

impl MessageSource for KafkaMessageSource {
    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<InboundMessage, BusError>>> + Send + '_>> {
        Box::pin(async move {
            let result = match self.consumer.recv().await {
                Ok(message) => {
                    tracing::trace!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "Received message"
                    );
                    Ok(to_inbound(&message))
                }
                Err(e) => Err(BusError::ReceiveFailed(e.to_string())),
            };
            Some(result)
        })
    }

    fn ack<'a>(
        &'a mut self,
        position: &'a MessagePosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>> {
        let result = self.commit(position);

        if result.is_ok() {
            tracing::debug!(position = %position, "Offset committed");
        }
        Box::pin(async move { result })
    }
}

/// Builder for configuring a [`KafkaMessageSource`].
///
/// # Example
///
/// ```no_run
/// use webhook_worker_redpanda::KafkaMessageSource;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = KafkaMessageSource::builder()
///     .brokers("b-1:9096,b-2:9096")
///     .group_id("webhook-worker")
///     .client_id("webhook-worker-1")
///     .security_protocol("SASL_SSL")
///     .sasl("SCRAM-SHA-512", "user", "secret")
///     .topics(["topic.pix"])
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct KafkaMessageSourceBuilder {
    brokers: Option<String>,
    group_id: Option<String>,
    client_id: Option<String>,
    auto_offset_reset: Option<String>,
    security_protocol: Option<String>,
    sasl: Option<(String, String, String)>,
    topics: Vec<String>,
    session_timeout: Option<Duration>,
    metadata_timeout: Option<Duration>,
}

impl KafkaMessageSourceBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group id. Default: [`DEFAULT_GROUP_ID`].
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the client id reported to the brokers.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set where a new consumer group starts reading.
    ///
    /// - `"earliest"`: Start from the beginning of the topic
    /// - `"latest"`: Start from the end (only new messages)
    ///
    /// Default: `"latest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set `security.protocol`, e.g. `SASL_SSL`. Default: `PLAINTEXT`.
    #[must_use]
    pub fn security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Enable SASL authentication with a mechanism such as `SCRAM-SHA-512`.
    #[must_use]
    pub fn sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl = Some((mechanism.into(), username.into(), password.into()));
        self
    }

    /// Set the topics to subscribe to.
    #[must_use]
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Set the consumer session timeout. Default: 6 seconds.
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Set the timeout of [`KafkaMessageSource::probe`]. Default: 10 seconds.
    #[must_use]
    pub const fn metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = Some(timeout);
        self
    }

    fn client_config(&self, brokers: &str) -> ClientConfig {
        let session_timeout = self.session_timeout.unwrap_or(Duration::from_secs(6));
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("group.id", self.group_id.as_deref().unwrap_or(DEFAULT_GROUP_ID))
            .set("enable.auto.commit", "false")
            .set(
                "auto.offset.reset",
                self.auto_offset_reset.as_deref().unwrap_or("latest"),
            )
            .set("session.timeout.ms", session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");

        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }
        if let Some(protocol) = &self.security_protocol {
            config.set("security.protocol", protocol);
        }
        if let Some((mechanism, username, password)) = &self.sasl {
            config
                .set("sasl.mechanisms", mechanism)
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
        config
    }

    /// Create the consumer and subscribe, without contacting the brokers.
    ///
    /// # Errors
    ///
    /// - [`BusError::ConnectionFailed`] if brokers are not set or the consumer
    ///   cannot be created
    /// - [`BusError::SubscriptionFailed`] if no topic is set or subscribing fails
    pub fn build(self) -> Result<KafkaMessageSource, BusError> {
        let brokers = self
            .brokers
            .clone()
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;

        if self.topics.is_empty() {
            return Err(BusError::SubscriptionFailed {
                topics: Vec::new(),
                reason: "No topics configured".to_string(),
            });
        }

        let consumer: StreamConsumer = self
            .client_config(&brokers)
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::SubscriptionFailed {
                topics: self.topics.clone(),
                reason: format!("Failed to subscribe to topics: {e}"),
            })?;

        tracing::info!(
            brokers = %brokers,
            topics = ?self.topics,
            group_id = self.group_id.as_deref().unwrap_or(DEFAULT_GROUP_ID),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            manual_commit = true,
            "Kafka consumer subscribed"
        );

        Ok(KafkaMessageSource {
            consumer: Arc::new(consumer),
            topics: self.topics,
            metadata_timeout: self.metadata_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }

    /// [`build`](Self::build), then [`probe`](KafkaMessageSource::probe) the brokers.
    ///
    /// # Errors
    ///
    /// Any error of [`build`](Self::build) or [`probe`](KafkaMessageSource::probe).
    pub async fn connect(self) -> Result<KafkaMessageSource, BusError> {
        let source = self.build()?;
        source.probe().await?;
        Ok(source)
    }
}
