//! Dead-letter store for messages consumers could not process.
//!
//! A delivery that fails in a consumer is recorded here with its error
//! context and then acknowledged on the bus, so it is never redelivered
//! automatically. Entries move through an operator workflow:
//! pending → processing → resolved/discarded.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use walletd_core::event::Envelope;
use walletd_core::event_store::EventStoreError;

/// Status of an entry in the dead-letter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Awaiting investigation or reprocessing.
    Pending,
    /// Currently being worked on.
    Processing,
    /// Successfully reprocessed.
    Resolved,
    /// Permanently discarded (cannot be fixed).
    Discarded,
}

impl DeadLetterStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self, EventStoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(EventStoreError::DatabaseError(format!(
                "Invalid dead-letter status: {s}"
            ))),
        }
    }
}

/// A dead-lettered message with its failure context.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Unique entry id.
    pub id: i64,
    /// Name of the consumer that failed (e.g. `projections`, `fraud`).
    pub consumer: String,
    /// Routing key the message arrived on.
    pub topic: String,
    /// The envelope that failed.
    pub envelope: Envelope,
    /// Human-readable error message.
    pub error_message: String,
    /// Full error details (debug output).
    pub error_details: Option<String>,
    /// When this message first failed.
    pub first_failed_at: DateTime<Utc>,
    /// When this message most recently failed.
    pub last_failed_at: DateTime<Utc>,
    /// Current workflow status.
    pub status: DeadLetterStatus,
    /// When the failure was resolved, if it was.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who or what resolved it.
    pub resolved_by: Option<String>,
    /// Resolution notes.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed dead-letter store.
///
/// # Example
///
/// ```no_run
/// use walletd_postgres::DeadLetterStore;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dead_letters = DeadLetterStore::new(pool);
///
/// let pending = dead_letters.list_pending(100).await?;
/// println!("pending failures: {}", pending.len());
/// # Ok(())
/// # }
/// ```
pub struct DeadLetterStore {
    pool: PgPool,
}

impl DeadLetterStore {
    /// Create a dead-letter store on the given pool (the write-side
    /// database).
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a failed message.
    ///
    /// Returns the id of the created entry.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the insert fails — the
    /// caller must then NOT acknowledge the delivery, so it is redelivered.
    pub async fn record(
        &self,
        consumer: &str,
        topic: &str,
        envelope: &Envelope,
        error_message: &str,
        error_details: Option<&str>,
    ) -> Result<i64, EventStoreError> {
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_messages
                (consumer, topic, event_type, payload, published_at, error_message, error_details)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(consumer)
        .bind(topic)
        .bind(&envelope.event_type)
        .bind(&envelope.data)
        .bind(envelope.published_at)
        .bind(error_message)
        .bind(error_details)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(
            dead_letter_id = id.0,
            consumer = consumer,
            topic = topic,
            event_type = %envelope.event_type,
            error = error_message,
            "Message dead-lettered"
        );

        metrics::counter!("event_bus.dead_letters.recorded", "consumer" => consumer.to_string())
            .increment(1);

        Ok(id.0)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedMessage>, EventStoreError> {
        self.list_by_status(DeadLetterStatus::Pending, limit).await
    }

    /// List entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DeadLetterStatus,
        limit: usize,
    ) -> Result<Vec<FailedMessage>, EventStoreError> {
        #[allow(clippy::cast_possible_wrap)] // Limit is a small bounded value
        let rows = sqlx::query(
            r"
            SELECT id, consumer, topic, event_type, payload, published_at,
                   error_message, error_details, first_failed_at, last_failed_at,
                   status, resolved_at, resolved_by, resolution_notes
            FROM failed_messages
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_failed_message).collect()
    }

    /// Update the workflow status of an entry.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the update fails.
    pub async fn update_status(
        &self,
        id: i64,
        status: DeadLetterStatus,
    ) -> Result<(), EventStoreError> {
        sqlx::query("UPDATE failed_messages SET status = $1, last_failed_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        tracing::info!(dead_letter_id = id, status = status.as_str(), "Dead-letter status updated");
        Ok(())
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'resolved', resolved_at = now(), resolved_by = $1, resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        tracing::info!(dead_letter_id = id, resolved_by = resolved_by, "Dead letter resolved");
        metrics::counter!("event_bus.dead_letters.resolved").increment(1);
        Ok(())
    }

    /// Mark an entry permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'discarded', resolved_at = now(), resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(dead_letter_id = id, reason = reason, "Dead letter discarded");
        metrics::counter!("event_bus.dead_letters.discarded").increment(1);
        Ok(())
    }

    /// Count pending entries (used by health surfaces).
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, EventStoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_messages WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    fn row_to_failed_message(row: &sqlx::postgres::PgRow) -> Result<FailedMessage, EventStoreError> {
        let status_str: String = row.get("status");
        let status = DeadLetterStatus::parse(&status_str)?;

        Ok(FailedMessage {
            id: row.get("id"),
            consumer: row.get("consumer"),
            topic: row.get("topic"),
            envelope: Envelope {
                event_type: row.get("event_type"),
                data: row.get("payload"),
                published_at: row.get("published_at"),
            },
            error_message: row.get("error_message"),
            error_details: row.get("error_details"),
            first_failed_at: row.get("first_failed_at"),
            last_failed_at: row.get("last_failed_at"),
            status,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}
