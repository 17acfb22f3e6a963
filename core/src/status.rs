//! Delivery status state machine.
//!
//! A delivery record is created in one of two states and, if it was queued,
//! moves exactly once to a terminal state:
//!
//! ```text
//! (created) ──config found──▶ Pending ──HTTP 200──────────▶ Sent { code }   [terminal]
//!                                    └──anything else───▶ Failed(code)    [terminal]
//! (created) ──no config────▶ Discarded                                       [terminal]
//! ```
//!
//! Nothing ever returns to [`DeliveryStatus::Pending`]; failed deliveries are
//! not re-queued.
//!
//! # Persisted form
//!
//! The `webhook_transaction.status` column stores a text encoding shared with
//! the existing table contents:
//!
//! | Variant                         | Text                                        |
//! |---------------------------------|---------------------------------------------|
//! | `Pending`                       | `IN-QUEUE:WAITING-FOR-SEND`                 |
//! | `Discarded`                     | `IN-QUEUE:MSG-DISCARDED-NO-WEBHOOK-SETUP`   |
//! | `Sent { code: 200 }`            | `IN-QUEUE:SENDED:200`                       |
//! | `Failed(FailureCode::Http(503))`| `IN-QUEUE:ERROR:503`                        |
//! | `Failed(FailureCode::Timeout)`  | `IN-QUEUE:ERROR:TIMEOUT`                    |
//! | `Failed(FailureCode::Transport)`| `IN-QUEUE:ERROR:TRANSPORT`                  |
//!
//! [`DeliveryStatus::parse`] also accepts the bare form without the
//! `IN-QUEUE:` prefix.

use crate::delivery::DeliveryError;
use crate::store::StoreError;
use std::fmt;

const QUEUE_PREFIX: &str = "IN-QUEUE:";
const PENDING: &str = "WAITING-FOR-SEND";
const DISCARDED: &str = "MSG-DISCARDED-NO-WEBHOOK-SETUP";
const SENT: &str = "SENDED:";
const ERROR: &str = "ERROR:";
const TIMEOUT: &str = "TIMEOUT";
const TRANSPORT: &str = "TRANSPORT";

/// The only HTTP status treated as a successful delivery.
pub const SUCCESS_STATUS: u16 = 200;

/// Why a delivery ended in [`DeliveryStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    /// The receiver answered with a status other than [`SUCCESS_STATUS`].
    Http(u16),
    /// The request did not complete within the per-call timeout.
    Timeout,
    /// No response: connection refused, DNS failure, TLS error and the like.
    Transport,
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(code) => write!(f, "{code}"),
            Self::Timeout => f.write_str(TIMEOUT),
            Self::Transport => f.write_str(TRANSPORT),
        }
    }
}

/// Lifecycle state of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    /// Queued and waiting for the dispatch loop.
    Pending,
    /// The event was recognized but no webhook is configured for its receiver.
    Discarded,
    /// Delivered; the receiver answered with `code`.
    Sent {
        /// HTTP status returned by the receiver.
        code: u16,
    },
    /// Delivery attempted and failed. Terminal, never retried.
    Failed(FailureCode),
}

impl DeliveryStatus {
    /// Map the result of one HTTP delivery attempt to its terminal status.
    ///
    /// Exactly HTTP 200 counts as sent. Every other status code, and every
    /// transport-level error, produces [`DeliveryStatus::Failed`] so that a
    /// record never stays pending because the call raised an error.
    #[must_use]
    pub fn from_outcome(outcome: &Result<u16, DeliveryError>) -> Self {
        match outcome {
            Ok(code) if *code == SUCCESS_STATUS => Self::Sent { code: *code },
            Ok(code) => Self::Failed(FailureCode::Http(*code)),
            Err(DeliveryError::Timeout(_)) => Self::Failed(FailureCode::Timeout),
            Err(DeliveryError::Transport(_) | DeliveryError::InvalidRequest(_)) => {
                Self::Failed(FailureCode::Transport)
            }
        }
    }

    /// Whether no further automatic transition can happen from this state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Encode for the `status` column.
    #[must_use]
    pub fn to_db_string(&self) -> String {
        self.to_string()
    }

    /// Decode a `status` column value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStatus`] if the text is not a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let bare = s.strip_prefix(QUEUE_PREFIX).unwrap_or(s);
        let invalid = || StoreError::InvalidStatus(s.to_string());

        if bare == PENDING {
            return Ok(Self::Pending);
        }
        if bare == DISCARDED {
            return Ok(Self::Discarded);
        }
        if let Some(code) = bare.strip_prefix(SENT) {
            let code = code.parse().map_err(|_| invalid())?;
            return Ok(Self::Sent { code });
        }
        if let Some(code) = bare.strip_prefix(ERROR) {
            let failure = match code {
                TIMEOUT => FailureCode::Timeout,
                TRANSPORT => FailureCode::Transport,
                other => FailureCode::Http(other.parse().map_err(|_| invalid())?),
            };
            return Ok(Self::Failed(failure));
        }
        Err(invalid())
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(QUEUE_PREFIX)?;
        match self {
            Self::Pending => f.write_str(PENDING),
            Self::Discarded => f.write_str(DISCARDED),
            Self::Sent { code } => write!(f, "{SENT}{code}"),
            Self::Failed(code) => write!(f, "{ERROR}{code}"),
        }
    }
}
