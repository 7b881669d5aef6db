//! Long-lived background tasks: bus consumers and the saga recovery
//! scanner.
//!
//! Each consumer owns one durable subscription and runs a sequential
//! recv → handle → ack loop (one in-flight delivery; natural backpressure).
//! A delivery the handler cannot process is recorded to the dead-letter
//! store and then acked — the reject-without-requeue semantics — so it
//! never cycles through redelivery. If even the dead-letter write fails the
//! delivery is left unacked and the loop resubscribes, which redelivers.

pub mod consumer;
pub mod recovery;

pub use consumer::EventConsumer;
pub use recovery::SagaRecovery;

use async_trait::async_trait;
use thiserror::Error;
use walletd_core::event_bus::Delivery;
use walletd_postgres::DeadLetterStore;

/// Errors a consumer handler can report for one delivery.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The envelope could not be parsed into a known event. Retrying
    /// cannot help; the delivery is dead-lettered.
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// The handler's storage failed. Also dead-lettered — consumers must
    /// be either complete-and-ack or recorded-and-ack, never half-applied.
    #[error("Handler storage failure: {0}")]
    Storage(String),
}

/// Processes one delivery at a time for a named consumer.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Consumer name (durable group, dead-letter attribution, logs).
    fn name(&self) -> &str;

    /// Handle one delivery. Must be idempotent: redelivery after a crash
    /// between handle and ack is part of the contract.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Where failed deliveries go.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Record a failed delivery with its error context.
    ///
    /// An `Err` here means the delivery could not be parked either; the
    /// consumer loop must then leave it unacked.
    async fn record(
        &self,
        consumer: &str,
        delivery: &Delivery,
        error: &HandlerError,
    ) -> Result<(), String>;
}

#[async_trait]
impl DeadLetterSink for DeadLetterStore {
    async fn record(
        &self,
        consumer: &str,
        delivery: &Delivery,
        error: &HandlerError,
    ) -> Result<(), String> {
        let details = format!("{error:?}");
        DeadLetterStore::record(
            self,
            consumer,
            &delivery.topic,
            &delivery.envelope,
            &error.to_string(),
            Some(details.as_str()),
        )
        .await
        .map(|_id| ())
        .map_err(|e| e.to_string())
    }
}
