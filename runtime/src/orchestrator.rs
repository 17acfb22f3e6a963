//! Runs the ingestor and the dispatch loop side by side.

use crate::dispatch::DispatchLoop;
use crate::ingest::EventIngestor;
use std::future::Future;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Abnormal termination of a worker task.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The task panicked or was aborted.
    #[error("{task} task failed: {reason}")]
    TaskFailed {
        /// `ingest` or `dispatch`
        task: &'static str,
        /// Join error message
        reason: String,
    },

    /// The task returned before shutdown was requested.
    #[error("{task} task exited before shutdown was requested")]
    UnexpectedExit {
        /// `ingest` or `dispatch`
        task: &'static str,
    },
}

/// Starts both loops with one shared shutdown signal and waits for them.
///
/// The loops never reference each other; this type only owns their tasks.
#[derive(Debug)]
pub struct WorkerOrchestrator {
    ingestor: EventIngestor,
    dispatcher: DispatchLoop,
}

impl WorkerOrchestrator {
    /// Pair an ingestor with a dispatch loop.
    #[must_use]
    pub const fn new(ingestor: EventIngestor, dispatcher: DispatchLoop) -> Self {
        Self {
            ingestor,
            dispatcher,
        }
    }

    /// Run both loops until `signal` completes, then drain them.
    ///
    /// If a loop stops on its own first, the other one is told to shut down
    /// as well. Each loop finishes its current message or record before it
    /// exits.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::TaskFailed`] if a loop panicked
    /// - [`WorkerError::UnexpectedExit`] if a loop stopped before `signal`
    pub async fn run_until<F>(self, signal: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut ingest = tokio::spawn(self.ingestor.run(shutdown_rx.clone()));
        let mut dispatch = tokio::spawn(self.dispatcher.run(shutdown_rx));
        tracing::info!("Worker started");

        let (first_exit, ingest_done, dispatch_done) = tokio::select! {
            () = signal => {
                tracing::info!("Shutting down worker");
                (None, None, None)
            }
            result = &mut ingest => {
                tracing::warn!("Ingestion task stopped, shutting down dispatch");
                (Some("ingest"), Some(result), None)
            }
            result = &mut dispatch => {
                tracing::warn!("Dispatch task stopped, shutting down ingestion");
                (Some("dispatch"), None, Some(result))
            }
        };

        // Receivers are owned by the tasks; a send error only means both have exited.
        let _ = shutdown_tx.send(true);

        let ingest_result = join("ingest", ingest_done, ingest).await;
        let dispatch_result = join("dispatch", dispatch_done, dispatch).await;
        tracing::info!("Worker stopped");

        ingest_result?;
        dispatch_result?;

        match first_exit {
            Some(task) => Err(WorkerError::UnexpectedExit { task }),
            None => Ok(()),
        }
    }
}

/// Use the result already taken by `select!`, or wait for the task.
async fn join(
    task: &'static str,
    done: Option<Result<(), tokio::task::JoinError>>,
    handle: JoinHandle<()>,
) -> Result<(), WorkerError> {
    let result = match done {
        Some(result) => result,
        None => handle.await,
    };
    result.map_err(|e| {
        tracing::error!(task, error = %e, "Worker task failed");
        WorkerError::TaskFailed {
            task,
            reason: e.to_string(),
        }
    })
}
