//! # Webhook Worker Runtime
//!
//! The two long-running loops of the worker and the task that owns them.
//!
//! ## Core Components
//!
//! - **[`EventIngestor`]**: bus message → delivery record, acknowledged after commit
//! - **[`DispatchLoop`]**: pending record → HTTP call → terminal status, one per tick
//! - **[`WorkerOrchestrator`]**: runs both with one shutdown signal
//! - **[`retry`]**: bounded, fixed-backoff retry for startup connections
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use webhook_worker_core::environment::SystemClock;
//! use webhook_worker_runtime::{DispatchLoop, EventIngestor, WorkerOrchestrator};
//!
//! let store = Arc::new(store);
//! let clock = Arc::new(SystemClock);
//! let ingestor = EventIngestor::new(Box::new(source), store.clone(), store.clone(), clock.clone());
//! let dispatcher = DispatchLoop::new(store, Arc::new(sender), clock);
//!
//! WorkerOrchestrator::new(ingestor, dispatcher)
//!     .run_until(async { tokio::signal::ctrl_c().await.ok(); })
//!     .await?;
//! ```

pub mod dispatch;
pub mod ingest;
pub mod orchestrator;
pub mod retry;

pub use dispatch::{DispatchError, DispatchLoop, DispatchOutcome, DispatchSettings, RECORDS_PER_TICK};
pub use ingest::{EventIngestor, IngestError, IngestOutcome};
pub use orchestrator::{WorkerError, WorkerOrchestrator};
pub use retry::{RetryPolicy, StartupError, retry_startup};
