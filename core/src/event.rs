//! Inbound event envelope and the closed set of supported event kinds.
//!
//! Bus messages carry a JSON envelope:
//!
//! ```json
//! { "type": "TOPIC:PIX", "payload": { "transaction_id": "tx-1", "account_from": { "account_id": "123" } } }
//! ```
//!
//! The `type` tag selects an [`EventKind`]; the `payload` decodes into that
//! kind's typed body. Producers that serialize the body as a byte array send
//! `payload` as a base64 string, and some send it as an embedded JSON string;
//! both are accepted.
//!
//! # Example
//!
//! ```
//! use webhook_worker_core::event::{Envelope, EventKind};
//!
//! let bytes = br#"{"type":"TOPIC:PIX","payload":{"account_from":{"account_id":"123"}}}"#;
//! match Envelope::decode(bytes).unwrap() {
//!     Envelope::Recognized { event, .. } => {
//!         assert_eq!(event.kind(), EventKind::Pix);
//!         assert_eq!(event.receiver(), "ACCOUNT:123");
//!     }
//!     Envelope::Unrecognized { .. } => unreachable!(),
//! }
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Prefix of receiver identifiers derived from an account.
pub const ACCOUNT_RECEIVER_PREFIX: &str = "ACCOUNT:";

/// Errors decoding an inbound envelope.
///
/// Both variants describe a message that will fail the same way on every
/// redelivery.
#[derive(Error, Debug)]
pub enum EventError {
    /// The message is not a JSON envelope.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The envelope names a supported kind but its body is missing or is not
    /// a JSON object.
    #[error("Invalid {kind} body: {reason}")]
    InvalidBody {
        /// Tag of the recognized kind
        kind: &'static str,
        /// Decoder message
        reason: String,
    },
}

/// Event kinds the worker turns into webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// PIX instant payment transaction.
    Pix,
}

impl EventKind {
    /// Every supported kind.
    pub const ALL: &'static [Self] = &[Self::Pix];

    /// The envelope `type` tag, also the `type` column of `webhook_config`.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Pix => "TOPIC:PIX",
        }
    }

    /// Look up a kind by its envelope tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }
}

/// Account reference inside a PIX transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Internal row id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Account identifier
    #[serde(default)]
    pub account_id: String,
    /// Owner identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_id: Option<String>,
}

/// Body of a `TOPIC:PIX` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PixTransaction {
    /// Business transaction id
    #[serde(default)]
    pub transaction_id: String,
    /// When the payment happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_at: Option<DateTime<Utc>>,
    /// Originating request id
    #[serde(default)]
    pub request_id: String,
    /// Paying account; its id determines the receiver
    #[serde(default)]
    pub account_from: Account,
    /// Receiving account
    #[serde(default)]
    pub account_to: Account,
    /// Payment status at the producer
    #[serde(default)]
    pub status: String,
    /// ISO currency code
    #[serde(default)]
    pub currency: String,
    /// Amount
    #[serde(default)]
    pub amount: f64,
}

impl PixTransaction {
    /// Salvage what a loosely-typed object body carries.
    ///
    /// Fields with unexpected types are left at their defaults; the account
    /// id is kept when it is a string, so routing still applies.
    fn from_object(body: &serde_json::Value) -> Self {
        let text = |value: Option<&serde_json::Value>| {
            value
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            transaction_id: text(body.get("transaction_id")),
            request_id: text(body.get("request_id")),
            account_from: Account {
                account_id: text(body.get("account_from").and_then(|a| a.get("account_id"))),
                ..Account::default()
            },
            ..Self::default()
        }
    }
}

/// A decoded event of a supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// `TOPIC:PIX`
    Pix(PixTransaction),
}

impl DomainEvent {
    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Pix(_) => EventKind::Pix,
        }
    }

    /// The receiver whose webhook configuration applies to this event.
    #[must_use]
    pub fn receiver(&self) -> String {
        match self {
            Self::Pix(tx) => format!("{ACCOUNT_RECEIVER_PREFIX}{}", tx.account_from.account_id),
        }
    }

    fn decode(kind: EventKind, body: &[u8]) -> Result<Self, EventError> {
        let invalid = |e: serde_json::Error| EventError::InvalidBody {
            kind: kind.tag(),
            reason: e.to_string(),
        };
        match kind {
            EventKind::Pix => match serde_json::from_slice::<PixTransaction>(body) {
                Ok(tx) => Ok(Self::Pix(tx)),
                // Any JSON object is routable; only non-object bodies are rejected.
                Err(e) => match serde_json::from_slice::<serde_json::Value>(body) {
                    Ok(value) if value.is_object() => {
                        Ok(Self::Pix(PixTransaction::from_object(&value)))
                    }
                    _ => Err(invalid(e)),
                },
            },
        }
    }
}

/// Result of classifying an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A supported kind with its decoded body.
    Recognized {
        /// Typed event
        event: DomainEvent,
        /// Body bytes as received; this is what gets delivered
        payload: Vec<u8>,
    },
    /// A kind this worker does not handle.
    Unrecognized {
        /// The envelope tag (empty if absent)
        tag: String,
    },
}

#[derive(Deserialize)]
struct RawEnvelope<'a> {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(borrow, default)]
    payload: Option<&'a RawValue>,
}

impl Envelope {
    /// Classify and decode a bus payload.
    ///
    /// # Errors
    ///
    /// - [`EventError::Malformed`] if the bytes are not a JSON envelope
    /// - [`EventError::InvalidBody`] if a supported kind has no body, or a body
    ///   that is not a JSON object
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let raw: RawEnvelope<'_> =
            serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))?;

        let Some(kind) = EventKind::from_tag(&raw.kind) else {
            return Ok(Self::Unrecognized { tag: raw.kind });
        };

        let payload = raw
            .payload
            .ok_or_else(|| EventError::InvalidBody {
                kind: kind.tag(),
                reason: "missing payload".to_string(),
            })
            .and_then(|value| body_bytes(kind, value))?;

        let event = DomainEvent::decode(kind, &payload)?;
        Ok(Self::Recognized { event, payload })
    }
}

/// Extract the body bytes from the `payload` field.
///
/// An object is taken verbatim. A string is either embedded JSON or base64.
fn body_bytes(kind: EventKind, value: &RawValue) -> Result<Vec<u8>, EventError> {
    let text = value.get();
    if !text.starts_with('"') {
        return Ok(text.as_bytes().to_vec());
    }

    let inner: String = serde_json::from_str(text).map_err(|e| EventError::InvalidBody {
        kind: kind.tag(),
        reason: e.to_string(),
    })?;
    if inner.trim_start().starts_with('{') {
        return Ok(inner.into_bytes());
    }
    STANDARD.decode(inner.trim()).map_err(|e| EventError::InvalidBody {
        kind: kind.tag(),
        reason: format!("payload is neither JSON nor base64: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn recognized(bytes: &[u8]) -> (DomainEvent, Vec<u8>) {
        match Envelope::decode(bytes).expect("envelope should decode") {
            Envelope::Recognized { event, payload } => (event, payload),
            Envelope::Unrecognized { tag } => panic!("unexpected unrecognized tag {tag}"),
        }
    }

    #[test]
    fn pix_receiver_is_prefixed_account_id() {
        let (event, payload) = recognized(
            br#"{"type":"TOPIC:PIX","payload":{"transaction_id":"tx-1","account_from":{"account_id":"123"}}}"#,
        );

        assert_eq!(event.kind(), EventKind::Pix);
        assert_eq!(event.receiver(), "ACCOUNT:123");
        assert_eq!(
            payload,
            br#"{"transaction_id":"tx-1","account_from":{"account_id":"123"}}"#.to_vec()
        );
    }

    #[test]
    fn base64_payload_is_decoded() {
        let body = r#"{"account_from":{"account_id":"42"}}"#;
        let envelope = format!(r#"{{"type":"TOPIC:PIX","payload":"{}"}}"#, STANDARD.encode(body));

        let (event, payload) = recognized(envelope.as_bytes());

        assert_eq!(event.receiver(), "ACCOUNT:42");
        assert_eq!(payload, body.as_bytes());
    }

    #[test]
    fn embedded_json_string_payload_is_accepted() {
        let (event, _) = recognized(
            br#"{"type":"TOPIC:PIX","payload":"{\"account_from\":{\"account_id\":\"7\"}}"}"#,
        );

        assert_eq!(event.receiver(), "ACCOUNT:7");
    }

    #[test]
    fn unknown_tag_is_unrecognized() {
        let envelope = Envelope::decode(br#"{"type":"TOPIC:TED","payload":{}}"#).unwrap();
        assert_eq!(envelope, Envelope::Unrecognized { tag: "TOPIC:TED".to_string() });

        let untagged = Envelope::decode(br#"{"payload":{}}"#).unwrap();
        assert_eq!(untagged, Envelope::Unrecognized { tag: String::new() });
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(Envelope::decode(b"not json"), Err(EventError::Malformed(_))));
    }

    #[test]
    fn recognized_kind_without_account_routes_to_empty_account() {
        let (event, payload) = recognized(br#"{"type":"TOPIC:PIX","payload":{"amount":10.5}}"#);

        assert_eq!(event.receiver(), "ACCOUNT:");
        assert_eq!(payload, br#"{"amount":10.5}"#.to_vec());
    }

    #[test]
    fn mistyped_fields_keep_the_account_id() {
        let (event, payload) = recognized(
            br#"{"type":"TOPIC:PIX","payload":{"amount":"ten","account_from":{"account_id":"123"}}}"#,
        );

        assert_eq!(event.receiver(), "ACCOUNT:123");
        assert_eq!(
            payload,
            br#"{"amount":"ten","account_from":{"account_id":"123"}}"#.to_vec()
        );
    }

    #[test]
    fn missing_or_non_object_body_is_invalid() {
        let missing = Envelope::decode(br#"{"type":"TOPIC:PIX"}"#);
        assert!(matches!(missing, Err(EventError::InvalidBody { .. })));

        let array = Envelope::decode(br#"{"type":"TOPIC:PIX","payload":[1,2]}"#);
        assert!(matches!(array, Err(EventError::InvalidBody { kind: "TOPIC:PIX", .. })));

        let not_base64 = Envelope::decode(br#"{"type":"TOPIC:PIX","payload":"%%%"}"#);
        assert!(matches!(not_base64, Err(EventError::InvalidBody { .. })));
    }

    #[test]
    fn every_kind_round_trips_through_its_tag() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_tag(kind.tag()), Some(*kind));
        }
        assert_eq!(EventKind::from_tag("TOPIC:pix"), None);
    }
}
