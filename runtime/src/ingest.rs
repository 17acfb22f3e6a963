//! Bus-to-store ingestion.
//!
//! For every inbound message the [`EventIngestor`] decodes the envelope,
//! resolves routing for recognized kinds and persists one delivery record in
//! its own transaction. The message is acknowledged only after that
//! transaction commits; on any storage failure it is left unacknowledged so
//! the bus redelivers it.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::Instrument;
use webhook_worker_core::bus::{BusError, InboundMessage, MessageSource};
use webhook_worker_core::correlation::{CorrelationId, trace_context};
use webhook_worker_core::environment::Clock;
use webhook_worker_core::event::Envelope;
use webhook_worker_core::model::NewDeliveryRecord;
use webhook_worker_core::store::{ConfigResolver, DeliveryStore, StoreError};

/// How a single message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Unsupported event kind; acknowledged without touching the store.
    Skipped,
    /// A pending record was committed.
    Queued {
        /// Id of the new record
        id: i64,
    },
    /// No webhook is configured; a discarded record was committed for audit.
    Discarded {
        /// Id of the new record
        id: i64,
    },
    /// The message can never be decoded; acknowledged and dropped.
    Poison,
}

/// Errors that leave a message unacknowledged.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Lookup, insert or commit failed; no record was persisted.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// The record was committed but the bus rejected the acknowledgment.
    #[error("Acknowledgment failed: {0}")]
    Ack(#[from] BusError),
}

/// Consumes bus messages and turns them into delivery records.
pub struct EventIngestor {
    source: Box<dyn MessageSource>,
    resolver: Arc<dyn ConfigResolver>,
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
}

impl EventIngestor {
    /// Create an ingestor over its collaborators.
    #[must_use]
    pub fn new(
        source: Box<dyn MessageSource>,
        resolver: Arc<dyn ConfigResolver>,
        store: Arc<dyn DeliveryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            resolver,
            store,
            clock,
        }
    }

    /// Run until `shutdown` turns `true` or the source closes.
    ///
    /// A message already received is handled to completion before the
    /// shutdown signal is observed again.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Starting event ingestor");

        while !*shutdown.borrow() {
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    continue;
                }
                next = self.source.recv() => next,
            };

            match next {
                None => {
                    tracing::warn!("Message source closed");
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Error receiving message from bus");
                }
                Some(Ok(message)) => {
                    if let Err(e) = self.process(&message).await {
                        tracing::error!(
                            position = %message.position,
                            error = %e,
                            "Message left unacknowledged"
                        );
                    }
                }
            }
        }

        tracing::info!("Event ingestor stopped");
    }

    /// Handle one message: classify, persist, then acknowledge.
    ///
    /// # Errors
    ///
    /// - [`IngestError::Storage`] if the config lookup or the record
    ///   transaction fails; the message is not acknowledged
    /// - [`IngestError::Ack`] if the bus rejects the acknowledgment
    pub async fn process(&mut self, message: &InboundMessage) -> Result<IngestOutcome, IngestError> {
        let correlation_id = CorrelationId::from_headers(&message.headers);
        let span = tracing::info_span!(
            "ingest",
            correlation_id = %correlation_id,
            position = %message.position,
        );

        async {
            for (key, value) in trace_context(&message.headers) {
                tracing::trace!(header = key, value = %value, "Trace context");
            }

            let outcome = self.persist(message).await?;
            self.source.ack(&message.position).await?;
            tracing::debug!(outcome = ?outcome, "Message acknowledged");
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    async fn persist(&mut self, message: &InboundMessage) -> Result<IngestOutcome, IngestError> {
        let (event, payload) = match Envelope::decode(&message.payload) {
            Ok(Envelope::Recognized { event, payload }) => (event, payload),
            Ok(Envelope::Unrecognized { tag }) => {
                tracing::debug!(event_type = %tag, "Skipping unsupported event kind");
                return Ok(IngestOutcome::Skipped);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable message");
                return Ok(IngestOutcome::Poison);
            }
        };

        let kind = event.kind();
        let receiver = event.receiver();
        let config = self.resolver.resolve(&receiver, kind).await?;
        let created_at = self.clock.now();

        let record = match &config {
            Some(config) => NewDeliveryRecord::queued(config, payload, created_at),
            None => {
                tracing::info!(
                    receiver = %receiver,
                    event_type = kind.tag(),
                    "No webhook configured, discarding"
                );
                NewDeliveryRecord::discarded(receiver.as_str(), payload, created_at)
            }
        };

        let mut tx = self.store.begin().await?;
        let id = match tx.insert(&record).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                tracing::warn!(error = %e, "Transaction rolled back");
                return Err(e.into());
            }
        };
        tx.commit().await?;

        tracing::info!(
            delivery_id = id,
            receiver = %receiver,
            status = %record.status,
            "Transaction committed"
        );

        Ok(if config.is_some() {
            IngestOutcome::Queued { id }
        } else {
            IngestOutcome::Discarded { id }
        })
    }
}

impl std::fmt::Debug for EventIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIngestor").finish_non_exhaustive()
    }
}
