//! `PostgreSQL` event store for the wallet service.
//!
//! Implements the [`EventStore`] trait from `walletd-core` on top of a
//! single `events` table with a `(aggregate_id, version)` uniqueness
//! constraint. The constraint — not application locking — is what makes
//! optimistic concurrency airtight: the version pre-check catches most
//! conflicts cheaply, and the constraint catches the race where two writers
//! pass the pre-check simultaneously.
//!
//! # Example
//!
//! ```no_run
//! use walletd_postgres::PostgresEventStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresEventStore::new("postgres://localhost/wallet_events").await?;
//!     store.run_migrations().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letter;

pub use dead_letter::{DeadLetterStatus, DeadLetterStore, FailedMessage};

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use walletd_core::event::{PendingEvent, RecordedEvent};
use walletd_core::event_store::{EventStore, EventStoreError};
use walletd_core::stream::{StreamId, Version};

/// `PostgreSQL`-backed append-only event log.
///
/// # Guarantees
///
/// - Appends are transactional: all events of a call commit at versions
///   `expected + 1 ..= expected + N`, or none do.
/// - `(aggregate_id, version)` is unique; a constraint violation is mapped
///   to [`EventStoreError::ConcurrencyConflict`].
/// - Events are never updated or deleted.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create a new event store from a database URL.
    ///
    /// Creates a connection pool with default settings (max 5 connections);
    /// use [`PostgresEventStore::from_pool`] for custom pool configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the URL is invalid or
    /// the database is unreachable.
    pub async fn new(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create a new event store from an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    ///
    /// Useful for health checks and for sharing the pool with the saga and
    /// dead-letter stores, which live in the same database.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the write-side database migrations (events, sagas, dead
    /// letters).
    ///
    /// Idempotent: already-applied migrations are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if a migration fails.
    pub async fn run_migrations(&self) -> Result<(), EventStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(format!("Migration failed: {e}")))?;

        tracing::info!("Event store migrations completed");
        Ok(())
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<RecordedEvent, EventStoreError> {
        let version: i64 = row.get("version");
        let version = u64::try_from(version).map_err(|e| {
            EventStoreError::DatabaseError(format!("Invalid version {version} in database: {e}"))
        })?;

        Ok(RecordedEvent {
            id: row.get("id"),
            aggregate_id: StreamId::new(row.get::<String, _>("aggregate_id")),
            aggregate_type: row.get("aggregate_type"),
            event_type: row.get("event_type"),
            payload: row.get("payload"),
            version: Version::new(version),
            transaction_id: row.get("transaction_id"),
            timestamp: row.get("created_at"),
        })
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        aggregate_id: StreamId,
        aggregate_type: &str,
        expected_version: Version,
        events: Vec<PendingEvent>,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = Result<Vec<RecordedEvent>, EventStoreError>>
                + Send
                + '_,
        >,
    > {
        let aggregate_type = aggregate_type.to_owned();
        Box::pin(async move {
            let start = std::time::Instant::now();

            if events.is_empty() {
                return Err(EventStoreError::DatabaseError(
                    "Cannot append empty event list".to_string(),
                ));
            }

            tracing::debug!(
                aggregate_id = %aggregate_id,
                expected_version = %expected_version,
                event_count = events.len(),
                "Appending events"
            );

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            // Cheap pre-check; the unique constraint below is the backstop
            // for the race where two writers both pass it.
            let current: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
            )
            .bind(aggregate_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            let current = Version::new(u64::try_from(current).map_err(|e| {
                EventStoreError::DatabaseError(format!("Invalid version {current}: {e}"))
            })?);

            if current != expected_version {
                tracing::warn!(
                    aggregate_id = %aggregate_id,
                    expected = %expected_version,
                    actual = %current,
                    "Optimistic concurrency conflict detected"
                );
                metrics::counter!("event_store.append.total", "result" => "conflict").increment(1);
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id: aggregate_id,
                    expected: expected_version,
                    actual: current,
                });
            }

            let mut recorded = Vec::with_capacity(events.len());
            let mut next_version = expected_version.next();

            for event in events {
                let version_i64 = i64::try_from(next_version.value()).map_err(|e| {
                    EventStoreError::DatabaseError(format!("Version overflow: {e}"))
                })?;

                let result = sqlx::query(
                    r"
                    INSERT INTO events
                        (aggregate_id, aggregate_type, event_type, payload, version, transaction_id, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING id
                    ",
                )
                .bind(aggregate_id.as_str())
                .bind(&aggregate_type)
                .bind(&event.event_type)
                .bind(&event.payload)
                .bind(version_i64)
                .bind(event.transaction_id)
                .bind(event.timestamp)
                .fetch_one(&mut *tx)
                .await;

                let id: i64 = match result {
                    Ok(row) => row.get("id"),
                    Err(e) => {
                        // 23505 = unique constraint violation: a concurrent
                        // writer committed this version between the
                        // pre-check and the insert.
                        if let Some(db_err) = e.as_database_error() {
                            if db_err.code().as_deref() == Some("23505") {
                                let actual: Option<i64> = sqlx::query_scalar(
                                    "SELECT MAX(version) FROM events WHERE aggregate_id = $1",
                                )
                                .bind(aggregate_id.as_str())
                                .fetch_optional(&mut *tx)
                                .await
                                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

                                let actual = Version::new(
                                    actual.and_then(|v| u64::try_from(v).ok()).unwrap_or(0),
                                );

                                tracing::warn!(
                                    aggregate_id = %aggregate_id,
                                    expected = %expected_version,
                                    actual = %actual,
                                    "Concurrent append detected via unique constraint"
                                );
                                metrics::counter!("event_store.append.total", "result" => "conflict")
                                    .increment(1);

                                return Err(EventStoreError::ConcurrencyConflict {
                                    stream_id: aggregate_id.clone(),
                                    expected: expected_version,
                                    actual,
                                });
                            }
                        }
                        return Err(EventStoreError::DatabaseError(e.to_string()));
                    }
                };

                recorded.push(RecordedEvent {
                    id,
                    aggregate_id: aggregate_id.clone(),
                    aggregate_type: aggregate_type.clone(),
                    event_type: event.event_type,
                    payload: event.payload,
                    version: next_version,
                    transaction_id: event.transaction_id,
                    timestamp: event.timestamp,
                });

                next_version = next_version.next();
            }

            tx.commit()
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            tracing::debug!(
                aggregate_id = %aggregate_id,
                final_version = %(next_version.value() - 1),
                "Events appended"
            );

            metrics::histogram!("event_store.append.duration_seconds")
                .record(start.elapsed().as_secs_f64());
            metrics::counter!("event_store.append.total", "result" => "success").increment(1);

            Ok(recorded)
        })
    }

    fn load(
        &self,
        aggregate_id: StreamId,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = Result<Vec<RecordedEvent>, EventStoreError>>
                + Send
                + '_,
        >,
    > {
        Box::pin(async move {
            let start = std::time::Instant::now();

            let rows = sqlx::query(
                r"
                SELECT id, aggregate_id, aggregate_type, event_type, payload, version,
                       transaction_id, created_at
                FROM events
                WHERE aggregate_id = $1
                ORDER BY version ASC
                ",
            )
            .bind(aggregate_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            let events: Vec<RecordedEvent> = rows
                .iter()
                .map(Self::row_to_event)
                .collect::<Result<_, _>>()?;

            tracing::debug!(
                aggregate_id = %aggregate_id,
                event_count = events.len(),
                "Loaded events"
            );
            metrics::histogram!("event_store.load.duration_seconds")
                .record(start.elapsed().as_secs_f64());

            Ok(events)
        })
    }

    fn latest_version(
        &self,
        aggregate_id: StreamId,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Version, EventStoreError>> + Send + '_>,
    > {
        Box::pin(async move {
            let version: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
            )
            .bind(aggregate_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            let version = u64::try_from(version).map_err(|e| {
                EventStoreError::DatabaseError(format!("Invalid version {version}: {e}"))
            })?;

            Ok(Version::new(version))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_event_store_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PostgresEventStore>();
        assert_sync::<PostgresEventStore>();
    }
}
