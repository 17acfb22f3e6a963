//! Periodic delivery of pending records.
//!
//! After an initial delay the [`DispatchLoop`] ticks on a fixed interval. A
//! tick takes at most [`RECORDS_PER_TICK`] of the oldest pending records,
//! sends each one and moves it to its terminal status in a single
//! transaction. Failures are contained to the tick; the loop keeps going.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use webhook_worker_core::delivery::{DeliveryError, DeliveryRequest, WebhookSender};
use webhook_worker_core::environment::Clock;
use webhook_worker_core::status::DeliveryStatus;
use webhook_worker_core::store::{DeliveryStore, StoreError};

/// Upper bound on deliveries per tick.
///
/// Throughput is therefore one delivery per [`DispatchSettings::tick_interval`].
pub const RECORDS_PER_TICK: usize = 1;

/// Timing of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Wait before the first tick
    pub initial_delay: Duration,
    /// Interval between ticks
    pub tick_interval: Duration,
    /// Timeout of each outbound call
    pub request_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            tick_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was pending.
    Idle,
    /// A record was sent and moved to a terminal status.
    Delivered {
        /// The record id
        id: i64,
        /// Its new status
        status: DeliveryStatus,
    },
}

/// Errors of a single dispatch attempt. None of them stop the loop.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Query, transaction or commit failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// The status update matched no pending row.
    #[error("Status update for delivery {id} affected no rows")]
    UpdateFailed {
        /// The record id
        id: i64,
    },
}

/// Polls the store for pending records and delivers them.
pub struct DispatchLoop {
    store: Arc<dyn DeliveryStore>,
    sender: Arc<dyn WebhookSender>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl DispatchLoop {
    /// Create a loop with default [`DispatchSettings`].
    #[must_use]
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        sender: Arc<dyn WebhookSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sender,
            clock,
            settings: DispatchSettings::default(),
        }
    }

    /// Override the timing.
    #[must_use]
    pub const fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The timing in use.
    #[must_use]
    pub const fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Tick until `shutdown` turns `true`.
    ///
    /// A tick in progress completes before the signal is observed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            initial_delay_ms = self.settings.initial_delay.as_millis(),
            tick_interval_ms = self.settings.tick_interval.as_millis(),
            "Starting dispatch loop"
        );

        let start = Instant::now() + self.settings.initial_delay;
        let mut ticker = tokio::time::interval_at(start, self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Dispatch tick failed");
                    }
                }
            }
        }

        tracing::info!("Dispatch loop stopped");
    }

    /// Deliver up to [`RECORDS_PER_TICK`] records; returns how many were delivered.
    ///
    /// # Errors
    ///
    /// Returns the first [`DispatchError`]; the rest of the tick is skipped.
    pub async fn tick(&self) -> Result<usize, DispatchError> {
        let mut delivered = 0;
        for _ in 0..RECORDS_PER_TICK {
            match self.dispatch_next().await? {
                DispatchOutcome::Idle => break,
                DispatchOutcome::Delivered { .. } => delivered += 1,
            }
        }
        Ok(delivered)
    }

    /// Deliver the oldest pending record, if any.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Storage`] if reading or updating the store fails
    /// - [`DispatchError::UpdateFailed`] if the record was no longer pending
    pub async fn dispatch_next(&self) -> Result<DispatchOutcome, DispatchError> {
        let Some(record) = self.store.next_pending().await? else {
            tracing::trace!("No pending deliveries");
            return Ok(DispatchOutcome::Idle);
        };

        let timeout = self.settings.request_timeout;
        let request = DeliveryRequest::for_record(&record, timeout);
        tracing::debug!(
            delivery_id = record.id,
            method = %request.method,
            url = %request.url,
            "Sending webhook"
        );

        let outcome = tokio::time::timeout(timeout, self.sender.send(request))
            .await
            .unwrap_or(Err(DeliveryError::Timeout(timeout)));
        let status = DeliveryStatus::from_outcome(&outcome);

        match &outcome {
            Ok(code) => {
                tracing::info!(delivery_id = record.id, code, status = %status, "Webhook answered");
            }
            Err(e) => {
                tracing::warn!(delivery_id = record.id, error = %e, status = %status, "Webhook failed");
            }
        }

        let mut tx = self.store.begin().await?;
        let rows = match tx.update_status(record.id, status, self.clock.now()).await {
            Ok(rows) => rows,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                return Err(e.into());
            }
        };

        if rows == 0 {
            tx.rollback().await?;
            return Err(DispatchError::UpdateFailed { id: record.id });
        }
        tx.commit().await?;

        Ok(DispatchOutcome::Delivered {
            id: record.id,
            status,
        })
    }
}

impl std::fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
