//! Request-scoped correlation for one inbound message.

use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Header carrying the producer's correlation id.
pub const CORRELATION_HEADER: &str = "trace-request-id";

/// Tracing propagation headers read from inbound messages.
pub const TRACE_HEADERS: &[&str] = &["X-Amzn-Trace-Id", "TraceID", "SpanID"];

/// Correlation id threaded through ingestion logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Take the id from message headers, or generate one if it is absent or empty.
    #[must_use]
    pub fn from_headers<S: std::hash::BuildHasher>(headers: &HashMap<String, String, S>) -> Self {
        headers
            .get(CORRELATION_HEADER)
            .filter(|id| !id.is_empty())
            .map_or_else(Self::generate, |id| Self::new(id.as_str()))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trace propagation values present on a message, in [`TRACE_HEADERS`] order.
#[must_use]
pub fn trace_context<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
) -> Vec<(&'static str, String)> {
    TRACE_HEADERS
        .iter()
        .filter_map(|key| headers.get(*key).map(|value| (*key, value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_value_is_reused() {
        let headers = HashMap::from([(CORRELATION_HEADER.to_string(), "abc-1".to_string())]);
        assert_eq!(CorrelationId::from_headers(&headers).as_str(), "abc-1");
    }

    #[test]
    fn missing_or_empty_header_generates_an_id() {
        let empty = HashMap::from([(CORRELATION_HEADER.to_string(), String::new())]);

        let a = CorrelationId::from_headers(&HashMap::new());
        let b = CorrelationId::from_headers(&empty);

        assert!(Uuid::parse_str(a.as_str()).is_ok());
        assert!(Uuid::parse_str(b.as_str()).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn trace_context_keeps_known_keys_only() {
        let headers = HashMap::from([
            ("TraceID".to_string(), "t-1".to_string()),
            ("other".to_string(), "x".to_string()),
        ]);

        assert_eq!(trace_context(&headers), vec![("TraceID", "t-1".to_string())]);
    }
}
