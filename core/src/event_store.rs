//! Event store trait: append-only log with optimistic concurrency.
//!
//! The event store is the only shared write path for wallet state. It is
//! deliberately minimal:
//!
//! - Append events to a stream, atomically, at an expected version
//! - Load a stream's events for state reconstruction
//! - Report a stream's latest version
//!
//! There is no snapshot support: streams here are short (a wallet's history)
//! and replay is cheap, so snapshots would be machinery without a payoff.
//!
//! # Implementations
//!
//! - `PostgresEventStore` (`walletd-postgres`): production implementation
//! - `InMemoryEventStore` (`walletd-testing`): deterministic tests with real
//!   conflict semantics

use crate::event::{PendingEvent, RecordedEvent};
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: the stream moved past the expected
    /// version. The caller may re-load and retry; nothing was written.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream where the conflict occurred.
        stream_id: StreamId,
        /// The version the caller expected the stream to be at.
        expected: Version,
        /// The version the stream was actually at.
        actual: Version,
    },

    /// Database connection or query error. Retryable; appends leave no
    /// partial state.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error for event payloads.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Append-only event log with per-aggregate optimistic concurrency.
///
/// # Concurrency
///
/// Two appends at the same `expected_version` cannot both succeed: the
/// `(aggregate_id, version)` uniqueness constraint (or its in-memory
/// equivalent) serializes writers per aggregate without locks. The loser
/// receives [`EventStoreError::ConcurrencyConflict`] and decides whether to
/// re-execute.
///
/// # Atomicity
///
/// `append` either commits every event at versions
/// `expected_version + 1 ..= expected_version + N` or commits nothing.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so it can be used as a trait object (`Arc<dyn EventStore>`)
/// and decorated (e.g. by the failure-injecting store in `walletd-testing`).
pub trait EventStore: Send + Sync {
    /// Append events to a stream at the expected version.
    ///
    /// Returns the recorded events with their assigned ids and versions, in
    /// append order.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::ConcurrencyConflict`]: the stream is not at
    ///   `expected_version` (concurrent writer won)
    /// - [`EventStoreError::DatabaseError`]: storage failed; retryable, no
    ///   partial state
    fn append(
        &self,
        aggregate_id: StreamId,
        aggregate_type: &str,
        expected_version: Version,
        events: Vec<PendingEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>;

    /// Load all events of a stream, ordered by version ascending.
    ///
    /// A stream with no events yields an empty vector — new wallets simply
    /// have no history yet.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the query fails; load
    /// failures are fatal to the command in progress.
    fn load(
        &self,
        aggregate_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>;

    /// The latest committed version of a stream ([`Version::INITIAL`] if the
    /// stream has no events).
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the query fails.
    fn latest_version(
        &self,
        aggregate_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::new("w1"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("w1"));
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }
}
