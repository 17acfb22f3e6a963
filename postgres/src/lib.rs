//! `PostgreSQL` delivery store for the webhook worker.
//!
//! This crate implements [`ConfigResolver`] and [`DeliveryStore`] from
//! `webhook-worker-core` on top of a sqlx connection pool:
//!
//! - `webhook_config`: routing entries keyed by `(receiver, type)`, read-only
//! - `webhook_transaction`: delivery records with a text `status` column
//!
//! Writes go through [`PgStoreTransaction`], a thin wrapper over
//! `sqlx::Transaction`. The pending-record query runs directly on the pool.
//!
//! # Example
//!
//! ```ignore
//! use webhook_worker_postgres::PostgresDeliveryStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresDeliveryStore::connect_url("postgres://localhost/webhooks", 30).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;
use webhook_worker_core::event::EventKind;
use webhook_worker_core::model::{DeliveryRecord, NewDeliveryRecord, WebhookConfig};
use webhook_worker_core::status::DeliveryStatus;
use webhook_worker_core::store::{ConfigResolver, DeliveryStore, StoreError, StoreTransaction};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| StoreError::DatabaseError(format!("{context}: {e}"))
}

/// `PostgreSQL`-backed routing lookup and delivery record store.
#[derive(Clone, Debug)]
pub struct PostgresDeliveryStore {
    pool: PgPool,
}

impl PostgresDeliveryStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from connection options.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if no connection can be established.
    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_error("Failed to connect"))?;
        Ok(Self::from_pool(pool))
    }

    /// Open a pool from a connection URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if no connection can be established.
    pub async fn connect_url(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_error("Failed to connect"))?;
        Ok(Self::from_pool(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `webhook_config` and `webhook_transaction` tables if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Provision a routing entry. The worker itself never writes configs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the insert fails, including a
    /// duplicate `(receiver, type)`.
    pub async fn insert_config(
        &self,
        receiver: &str,
        kind: EventKind,
        host: &str,
        url: &str,
        method: &str,
    ) -> Result<WebhookConfig, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO webhook_config (receiver, type, host, url, method)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, receiver, type, host, url, method, created_at, updated_at
            ",
        )
        .bind(receiver)
        .bind(kind.tag())
        .bind(host)
        .bind(url)
        .bind(method)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to insert webhook config"))?;

        row_to_config(&row)
    }
}

impl ConfigResolver for PostgresDeliveryStore {
    fn resolve<'a>(
        &'a self,
        receiver: &'a str,
        kind: EventKind,
    ) -> BoxFuture<'a, Result<Option<WebhookConfig>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, receiver, type, host, url, method, created_at, updated_at
                FROM webhook_config
                WHERE receiver = $1 AND type = $2
                ",
            )
            .bind(receiver)
            .bind(kind.tag())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load webhook config"))?;

            row.as_ref().map(row_to_config).transpose()
        })
    }
}

impl DeliveryStore for PostgresDeliveryStore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn StoreTransaction>, StoreError>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(db_error("Failed to start transaction"))?;
            Ok(Box::new(PgStoreTransaction { tx }) as Box<dyn StoreTransaction>)
        })
    }

    fn next_pending(&self) -> BoxFuture<'_, Result<Option<DeliveryRecord>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, receiver, host, url, method, payload, status, created_at, updated_at
                FROM webhook_transaction
                WHERE status = $1
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                ",
            )
            .bind(DeliveryStatus::Pending.to_db_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load pending delivery"))?;

            row.as_ref().map(row_to_record).transpose()
        })
    }
}

/// An open `PostgreSQL` transaction on `webhook_transaction`.
///
/// Dropping it without committing rolls back, as sqlx does.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

impl StoreTransaction for PgStoreTransaction {
    fn insert<'a>(
        &'a mut self,
        record: &'a NewDeliveryRecord,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO webhook_transaction
                    (receiver, host, url, method, payload, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                ",
            )
            .bind(&record.receiver)
            .bind(&record.host)
            .bind(&record.url)
            .bind(&record.method)
            .bind(&record.payload)
            .bind(record.status.to_db_string())
            .bind(record.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error("Failed to insert delivery"))?;

            tracing::debug!(delivery_id = id, receiver = %record.receiver, "Delivery inserted");
            Ok(id)
        })
    }

    fn update_status(
        &mut self,
        id: i64,
        status: DeliveryStatus,
        updated_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            // Only a pending row may move; terminal rows stay as they are.
            let result = sqlx::query(
                r"
                UPDATE webhook_transaction
                SET status = $2,
                    updated_at = $3
                WHERE id = $1 AND status = $4
                ",
            )
            .bind(id)
            .bind(status.to_db_string())
            .bind(updated_at)
            .bind(DeliveryStatus::Pending.to_db_string())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("Failed to update delivery status"))?;

            Ok(result.rows_affected())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        let Self { tx } = *self;
        Box::pin(async move {
            tx.commit()
                .await
                .map_err(db_error("Failed to commit transaction"))
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        let Self { tx } = *self;
        Box::pin(async move {
            tx.rollback()
                .await
                .map_err(db_error("Failed to roll back transaction"))
        })
    }
}

fn row_to_config(row: &PgRow) -> Result<WebhookConfig, StoreError> {
    let decode = db_error("Failed to decode webhook config");
    Ok(WebhookConfig {
        id: row.try_get("id").map_err(&decode)?,
        receiver: row.try_get("receiver").map_err(&decode)?,
        kind: row.try_get("type").map_err(&decode)?,
        host: row.try_get("host").map_err(&decode)?,
        url: row.try_get("url").map_err(&decode)?,
        method: row.try_get("method").map_err(&decode)?,
        created_at: row.try_get("created_at").map_err(&decode)?,
        updated_at: row.try_get("updated_at").map_err(&decode)?,
    })
}

fn row_to_record(row: &PgRow) -> Result<DeliveryRecord, StoreError> {
    let decode = db_error("Failed to decode delivery");
    let status: String = row.try_get("status").map_err(&decode)?;
    Ok(DeliveryRecord {
        id: row.try_get("id").map_err(&decode)?,
        receiver: row.try_get("receiver").map_err(&decode)?,
        host: row.try_get("host").map_err(&decode)?,
        url: row.try_get("url").map_err(&decode)?,
        method: row.try_get("method").map_err(&decode)?,
        payload: row.try_get("payload").map_err(&decode)?,
        status: DeliveryStatus::parse(&status)?,
        created_at: row.try_get("created_at").map_err(&decode)?,
        updated_at: row.try_get("updated_at").map_err(&decode)?,
    })
}
