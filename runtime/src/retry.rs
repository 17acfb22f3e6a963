//! Bounded retry of startup connections.
//!
//! The worker cannot do anything without its store and its bus, so both are
//! connected with a fixed number of attempts and a fixed pause between them.
//! Exhausting the attempts is fatal.
//!
//! # Example
//!
//! ```rust
//! use webhook_worker_runtime::retry::{RetryPolicy, retry_startup};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .backoff(Duration::from_millis(10))
//!     .build();
//!
//! let pool = retry_startup("database", &policy, || async {
//!     // Your connection attempt here
//!     Ok::<_, String>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// A required resource stayed unreachable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// Every attempt failed.
    #[error("{resource} unreachable after {attempts} attempts: {last_error}")]
    Exhausted {
        /// What was being connected, e.g. `database`
        resource: &'static str,
        /// Attempts made
        attempts: usize,
        /// Message of the final failure
        last_error: String,
    },
}

/// Fixed-backoff retry configuration.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `backoff`: 3 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Pause after each failed attempt
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            backoff: None,
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<usize>,
    backoff: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Set the total number of attempts. Values below 1 are treated as 1.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the pause between attempts.
    #[must_use]
    pub const fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            backoff: self.backoff.unwrap_or(defaults.backoff),
        }
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is reached.
///
/// There is no pause after the final attempt.
///
/// # Errors
///
/// Returns [`StartupError::Exhausted`] carrying the last failure message.
pub async fn retry_startup<F, Fut, T, E>(
    resource: &'static str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, StartupError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(resource, attempt, "Connected after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt >= max_attempts => {
                tracing::error!(resource, attempt, error = %err, "Giving up");
                return Err(StartupError::Exhausted {
                    resource,
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }
            Err(err) => {
                tracing::warn!(
                    resource,
                    attempt,
                    delay_ms = policy.backoff.as_millis(),
                    error = %err,
                    "Connection failed, retrying..."
                );
                sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}
