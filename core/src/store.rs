//! Persistence contracts: routing lookup and the delivery record store.
//!
//! The relational store is the only state shared by the ingestion and
//! dispatch loops. Every write happens inside a [`StoreTransaction`] obtained
//! from [`DeliveryStore::begin`]; nothing is visible to the other loop until
//! the transaction commits.
//!
//! # Implementations
//!
//! - `PostgresDeliveryStore` (in `webhook-worker-postgres`): Production implementation
//! - `InMemoryDeliveryStore` (in `webhook-worker-testing`): Fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use webhook_worker_core::store::{DeliveryStore, StoreError};
//! use webhook_worker_core::status::DeliveryStatus;
//! use chrono::Utc;
//!
//! async fn finish<S: DeliveryStore>(store: &S) -> Result<(), StoreError> {
//!     if let Some(record) = store.next_pending().await? {
//!         let mut tx = store.begin().await?;
//!         let rows = tx
//!             .update_status(record.id, DeliveryStatus::Sent { code: 200 }, Utc::now())
//!             .await?;
//!         if rows == 0 {
//!             tx.rollback().await?;
//!             return Err(StoreError::UpdateFailed { id: record.id });
//!         }
//!         tx.commit().await?;
//!     }
//!     Ok(())
//! }
//! ```

use crate::event::EventKind;
use crate::model::{DeliveryRecord, NewDeliveryRecord, WebhookConfig};
use crate::status::DeliveryStatus;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A status update matched no pending row: the record vanished or is
    /// already terminal.
    #[error("Update affected 0 rows for delivery {id}")]
    UpdateFailed {
        /// The delivery record id
        id: i64,
    },

    /// Query, connection or transaction failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A `status` column value that is not a known status.
    #[error("Invalid delivery status: {0}")]
    InvalidStatus(String),
}

/// Read-only lookup of webhook routing configuration.
pub trait ConfigResolver: Send + Sync {
    /// Find the configuration for `(receiver, kind)`.
    ///
    /// Returns `Ok(None)` when nothing is configured; that is an expected
    /// outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the lookup itself fails.
    fn resolve<'a>(
        &'a self,
        receiver: &'a str,
        kind: EventKind,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookConfig>, StoreError>> + Send + 'a>>;
}

/// Transactional storage of delivery records.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn DeliveryStore>`), which is how the
/// runtime receives its collaborators.
pub trait DeliveryStore: Send + Sync {
    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if no connection is available.
    fn begin(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StoreTransaction>, StoreError>> + Send + '_>>;

    /// The oldest record in [`DeliveryStatus::Pending`], by `created_at`.
    ///
    /// Returns `Ok(None)` when nothing is pending. Exactly one record is
    /// returned per call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails or a row cannot be decoded.
    fn next_pending(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DeliveryRecord>, StoreError>> + Send + '_>>;
}

/// An open store transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes.
pub trait StoreTransaction: Send {
    /// Insert a record and return its newly assigned id.
    ///
    /// Ids are strictly increasing in insert order and never reused.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the write fails; the caller
    /// must roll back.
    fn insert<'a>(
        &'a mut self,
        record: &'a NewDeliveryRecord,
    ) -> Pin<Box<dyn Future<Output = Result<i64, StoreError>> + Send + 'a>>;

    /// Move a pending record to `status` and return the number of rows
    /// affected.
    ///
    /// Only a row still in [`DeliveryStatus::Pending`] is updated, so `0`
    /// means the record vanished or was already terminal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the write fails.
    fn update_status(
        &mut self,
        id: i64,
        status: DeliveryStatus,
        updated_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>>;

    /// Make all writes of this transaction visible.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the commit fails; nothing is
    /// persisted in that case.
    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>>;

    /// Discard all writes of this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the rollback fails.
    fn rollback(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>>;
}
