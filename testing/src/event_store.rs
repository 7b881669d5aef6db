//! In-memory event store with real optimistic-concurrency semantics.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use walletd_core::event::{PendingEvent, RecordedEvent};
use walletd_core::event_store::{EventStore, EventStoreError};
use walletd_core::stream::{StreamId, Version};

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Vec<RecordedEvent>>,
    next_id: i64,
}

/// In-memory event log for tests.
///
/// The version check and insert happen under one lock, so concurrent
/// appends at the same expected version race exactly as they do against the
/// Postgres uniqueness constraint: one wins, the rest get
/// [`EventStoreError::ConcurrencyConflict`].
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-append;
        // recover the data rather than cascading the panic.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Total number of events across all streams.
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.lock().streams.values().map(Vec::len).sum()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        aggregate_id: StreamId,
        aggregate_type: &str,
        expected_version: Version,
        events: Vec<PendingEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>
    {
        let aggregate_type = aggregate_type.to_owned();
        Box::pin(async move {
            if events.is_empty() {
                return Err(EventStoreError::DatabaseError(
                    "Cannot append empty event list".to_string(),
                ));
            }

            let mut inner = self.lock();
            let stream = inner
                .streams
                .entry(aggregate_id.as_str().to_string())
                .or_default();

            let current = Version::new(stream.len() as u64);
            if current != expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id: aggregate_id,
                    expected: expected_version,
                    actual: current,
                });
            }

            let mut recorded = Vec::with_capacity(events.len());
            let mut version = current;
            // Collect first so the id counter and stream update stay
            // consistent under the single lock.
            for event in events {
                version = version.next();
                recorded.push(RecordedEvent {
                    id: 0, // assigned below
                    aggregate_id: aggregate_id.clone(),
                    aggregate_type: aggregate_type.clone(),
                    event_type: event.event_type,
                    payload: event.payload,
                    version,
                    transaction_id: event.transaction_id,
                    timestamp: event.timestamp,
                });
            }

            for event in &mut recorded {
                inner.next_id += 1;
                event.id = inner.next_id;
            }
            if let Some(stream) = inner.streams.get_mut(aggregate_id.as_str()) {
                stream.extend(recorded.iter().cloned());
            }

            Ok(recorded)
        })
    }

    fn load(
        &self,
        aggregate_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            Ok(self
                .lock()
                .streams
                .get(aggregate_id.as_str())
                .cloned()
                .unwrap_or_default())
        })
    }

    fn latest_version(
        &self,
        aggregate_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let len = self
                .lock()
                .streams
                .get(aggregate_id.as_str())
                .map_or(0, Vec::len);
            Ok(Version::new(len as u64))
        })
    }
}

/// How a [`FailingEventStore`] fails appends for one aggregate.
#[derive(Clone, Copy, Debug)]
enum FailMode {
    /// Every append fails.
    Always,
    /// The next N appends pass, then every append fails.
    AfterNext(u32),
}

/// Decorator that injects append failures for chosen aggregates.
///
/// Used to force the compensation paths of the transfer saga: fail the
/// destination wallet's append and the source must be refunded; let the
/// source's debit through and fail its refund
/// ([`FailingEventStore::fail_appends_after`]) and the saga sticks in its
/// needs-an-operator state.
pub struct FailingEventStore {
    inner: Arc<dyn EventStore>,
    failing: Mutex<HashMap<String, FailMode>>,
}

impl FailingEventStore {
    /// Wrap an event store; no failures are injected until one of the
    /// `fail_appends_*` methods is called.
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashMap::new()),
        }
    }

    /// Make every append for the given aggregate fail with a database
    /// error.
    pub fn fail_appends_for(&self, aggregate_id: &StreamId) {
        self.failing_lock()
            .insert(aggregate_id.as_str().to_string(), FailMode::Always);
    }

    /// Let the next `allowed` appends for the aggregate through, then fail
    /// every one after that.
    pub fn fail_appends_after(&self, aggregate_id: &StreamId, allowed: u32) {
        self.failing_lock()
            .insert(aggregate_id.as_str().to_string(), FailMode::AfterNext(allowed));
    }

    /// Stop injecting failures for the given aggregate.
    pub fn heal(&self, aggregate_id: &StreamId) {
        self.failing_lock().remove(aggregate_id.as_str());
    }

    fn failing_lock(&self) -> MutexGuard<'_, HashMap<String, FailMode>> {
        self.failing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether the next append for this aggregate should fail (and count
    /// down the pass-through budget if not).
    fn should_fail(&self, aggregate_id: &StreamId) -> bool {
        let mut failing = self.failing_lock();
        match failing.get_mut(aggregate_id.as_str()) {
            None => false,
            Some(FailMode::Always) => true,
            Some(FailMode::AfterNext(0)) => true,
            Some(FailMode::AfterNext(remaining)) => {
                *remaining -= 1;
                false
            }
        }
    }
}

impl EventStore for FailingEventStore {
    fn append(
        &self,
        aggregate_id: StreamId,
        aggregate_type: &str,
        expected_version: Version,
        events: Vec<PendingEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>
    {
        if self.should_fail(&aggregate_id) {
            return Box::pin(async move {
                Err(EventStoreError::DatabaseError(format!(
                    "injected append failure for {aggregate_id}"
                )))
            });
        }
        self.inner
            .append(aggregate_id, aggregate_type, expected_version, events)
    }

    fn load(
        &self,
        aggregate_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>
    {
        self.inner.load(aggregate_id)
    }

    fn latest_version(
        &self,
        aggregate_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        self.inner.latest_version(aggregate_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn pending(event_type: &str) -> PendingEvent {
        PendingEvent::new(
            event_type,
            serde_json::json!({}),
            Uuid::new_v4(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn append_assigns_versions_and_ids() {
        let store = InMemoryEventStore::new();
        let id = StreamId::new("w1");

        let recorded = store
            .append(
                id.clone(),
                "wallet",
                Version::INITIAL,
                vec![pending("a"), pending("b")],
            )
            .await
            .unwrap();

        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].version, Version::new(1));
        assert_eq!(recorded[1].version, Version::new(2));
        assert!(recorded[0].id < recorded[1].id);
        assert_eq!(store.latest_version(id).await.unwrap(), Version::new(2));
    }

    #[tokio::test]
    async fn append_at_stale_version_conflicts() {
        let store = InMemoryEventStore::new();
        let id = StreamId::new("w1");

        store
            .append(id.clone(), "wallet", Version::INITIAL, vec![pending("a")])
            .await
            .unwrap();

        let err = store
            .append(id.clone(), "wallet", Version::INITIAL, vec![pending("b")])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EventStoreError::ConcurrencyConflict { expected, actual, .. }
                if expected == Version::INITIAL && actual == Version::new(1)
        ));
    }

    #[tokio::test]
    async fn load_of_unknown_stream_is_empty() {
        let store = InMemoryEventStore::new();
        let events = store.load(StreamId::new("missing")).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(
            store.latest_version(StreamId::new("missing")).await.unwrap(),
            Version::INITIAL
        );
    }

    #[tokio::test]
    async fn failing_store_injects_and_heals() {
        let inner = Arc::new(InMemoryEventStore::new());
        let store = FailingEventStore::new(inner);
        let id = StreamId::new("w1");

        store.fail_appends_for(&id);
        assert!(store
            .append(id.clone(), "wallet", Version::INITIAL, vec![pending("a")])
            .await
            .is_err());

        store.heal(&id);
        assert!(store
            .append(id.clone(), "wallet", Version::INITIAL, vec![pending("a")])
            .await
            .is_ok());
    }
}
