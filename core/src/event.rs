//! Event model: pending events, recorded events and the bus envelope.
//!
//! Events are immutable facts about past state changes and the only source
//! of truth for wallet balances. This module defines the three shapes an
//! event passes through:
//!
//! 1. [`PendingEvent`] — produced by the aggregate, not yet versioned.
//! 2. [`RecordedEvent`] — committed to the log with a global id and a
//!    per-aggregate version.
//! 3. [`Envelope`] — the JSON wire format published to the event bus:
//!    `{eventType, data, publishedAt}`.
//!
//! # Event type tags
//!
//! Event types are stable dotted strings that double as the bus routing
//! keys, e.g. `wallet.money.deposited`. Consumers dispatch on the tag with
//! exhaustive matching over a closed set of variants; there is no
//! reflection.

use crate::stream::{StreamId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event serialization.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event payload or envelope.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event payload or envelope.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),

    /// Unknown event type tag encountered during dispatch.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// An event produced by an aggregate, ready for appending.
///
/// The event store assigns the version and the global id at append time;
/// everything else — including the transaction id that downstream consumers
/// use for deduplication — is fixed when the aggregate emits the event.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    /// Stable dotted event type tag (e.g. `wallet.money.deposited`).
    pub event_type: String,

    /// Structured event payload. Opaque to the store.
    pub payload: serde_json::Value,

    /// Transaction id for this event (fresh UUID per wallet-affecting
    /// event); drives projection idempotency.
    pub transaction_id: Uuid,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl PendingEvent {
    /// Create a new pending event.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        transaction_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            transaction_id,
            timestamp,
        }
    }
}

/// An event committed to the log.
///
/// `(aggregate_id, version)` is globally unique; `id` is monotonic in
/// insertion order across all aggregates (advisory — per-aggregate causality
/// is what `version` captures).
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    /// Global monotonic id assigned by the store.
    pub id: i64,

    /// The aggregate this event belongs to.
    pub aggregate_id: StreamId,

    /// Aggregate type tag (e.g. `wallet`).
    pub aggregate_type: String,

    /// Stable dotted event type tag.
    pub event_type: String,

    /// Structured event payload.
    pub payload: serde_json::Value,

    /// Position of this event in the aggregate's stream (1-based, no gaps).
    pub version: Version,

    /// Transaction id carried over from the pending event.
    pub transaction_id: Uuid,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for RecordedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} on {} ({})",
            self.event_type, self.version, self.aggregate_id, self.transaction_id
        )
    }
}

/// The JSON wire format for events on the bus.
///
/// Published verbatim as `{"eventType": …, "data": …, "publishedAt": …}`.
/// `data` always carries `timestamp` and `transactionId`; wallet events add
/// `walletId` and `balanceAfter`, transfer events add `sagaId` plus the
/// involved wallet ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Stable dotted event type tag; also the routing key it is published
    /// under.
    pub event_type: String,

    /// Event-specific payload.
    pub data: serde_json::Value,

    /// When the publisher put this envelope on the bus (ISO-8601).
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            published_at,
        }
    }

    /// Serialize the envelope to its JSON wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize an envelope from its JSON wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the bytes are not a valid
    /// envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope {{ type: {}, at: {} }}", self.event_type, self.published_at)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_format_is_camel_case() {
        let envelope = Envelope::new(
            "wallet.money.deposited",
            serde_json::json!({ "walletId": "w1", "amount": 100.0 }),
            "2025-01-01T00:00:00Z".parse().unwrap(),
        );

        let json: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(json["eventType"], "wallet.money.deposited");
        assert_eq!(json["data"]["walletId"], "w1");
        assert_eq!(json["publishedAt"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn envelope_roundtrip() {
        let envelope = Envelope::new(
            "wallet.transfer.completed",
            serde_json::json!({ "sagaId": "abc" }),
            Utc::now(),
        );

        let bytes = envelope.to_bytes().unwrap();
        let back = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn envelope_from_garbage_fails() {
        assert!(Envelope::from_bytes(b"not json").is_err());
    }

    #[test]
    fn recorded_event_display() {
        let event = RecordedEvent {
            id: 7,
            aggregate_id: StreamId::new("w1"),
            aggregate_type: "wallet".to_string(),
            event_type: "wallet.money.deposited".to_string(),
            payload: serde_json::json!({}),
            version: Version::new(3),
            transaction_id: Uuid::nil(),
            timestamp: Utc::now(),
        };

        let display = format!("{event}");
        assert!(display.contains("wallet.money.deposited"));
        assert!(display.contains("v3"));
        assert!(display.contains("w1"));
    }
}
