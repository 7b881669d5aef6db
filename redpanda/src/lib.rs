//! Redpanda event bus for the wallet service.
//!
//! Implements the [`EventBus`] trait from `walletd-core` using rdkafka.
//! Routing keys map directly to topics (`wallet.money.deposited` is a
//! topic), and each consumer subscribes under its own durable group so
//! projections and fraud each receive every event independently.
//!
//! # Delivery semantics
//!
//! Auto-commit is disabled; the offset of a delivery is committed only when
//! the consumer loop calls [`BusConsumer::ack`] after successful handling
//! (or after dead-lettering). A crash between handling and ack therefore
//! redelivers — consumers are idempotent for exactly this reason. The
//! sequential recv → handle → ack loop keeps one delivery in flight per
//! consumer.
//!
//! # Example
//!
//! ```no_run
//! use walletd_redpanda::RedpandaEventBus;
//! use walletd_core::event_bus::{BusConsumer, EventBus, Subscription};
//! use walletd_core::event::Envelope;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//!
//! let envelope = Envelope::new(
//!     "wallet.money.deposited",
//!     serde_json::json!({ "walletId": "w1" }),
//!     chrono::Utc::now(),
//! );
//! bus.publish("wallet.money.deposited", &envelope).await?;
//!
//! let mut consumer = bus
//!     .subscribe(Subscription::new(
//!         "projections",
//!         vec!["wallet.money.deposited".to_string()],
//!     ))
//!     .await?;
//! if let Some(delivery) = consumer.recv().await? {
//!     // handle, then:
//!     consumer.ack(&delivery).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use walletd_core::event::Envelope;
use walletd_core::event_bus::{BusConsumer, Delivery, EventBus, EventBusError, Subscription};

/// Redpanda-backed event bus.
///
/// - **Durable**: producer waits for broker acknowledgment (configurable).
/// - **At-least-once**: consumers commit offsets only after handling.
/// - **Per-topic ordering**: one routing key maps to one topic; order across
///   keys is not guaranteed and consumers do not rely on it.
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
}

impl RedpandaEventBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Broker addresses this bus connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    /// Default: `"all"` — events are already committed to the log when they
    /// reach the bus, but an unacknowledged publish is a silently lost
    /// projection update.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec (`"none"`, `"gzip"`, `"lz4"`, …).
    /// Default: `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = envelope.to_bytes().map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: format!("Failed to serialize envelope: {e}"),
            })?;

            // Key by event type so each routing key's events stay on one
            // partition (per-key ordering).
            let key = envelope.event_type.as_bytes();

            let record = FutureRecord::to(&topic).payload(&payload).key(key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        event_type = %envelope.event_type,
                        "Event published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusConsumer>, EventBusError>> + Send + '_>>
    {
        let brokers = self.brokers.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &subscription.group)
                // Manual ack: offsets are committed one delivery at a time
                // from BusConsumer::ack, never in the background.
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    group: subscription.group.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = subscription.topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    group: subscription.group.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                group = %subscription.group,
                topics = ?subscription.topics,
                "Subscribed to event bus"
            );

            Ok(Box::new(RedpandaBusConsumer { consumer }) as Box<dyn BusConsumer>)
        })
    }
}

/// Consumer half of a Redpanda subscription.
struct RedpandaBusConsumer {
    consumer: StreamConsumer,
}

impl BusConsumer for RedpandaBusConsumer {
    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>, EventBusError>> + Send + '_>> {
        Box::pin(async move {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|e| EventBusError::TransportError(format!("Receive failed: {e}")))?;

            let Some(payload) = message.payload() else {
                return Err(EventBusError::DeserializationFailed(
                    "Message has no payload".to_string(),
                ));
            };

            let envelope = Envelope::from_bytes(payload)
                .map_err(|e| EventBusError::DeserializationFailed(e.to_string()))?;

            tracing::trace!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                event_type = %envelope.event_type,
                "Received event"
            );

            Ok(Some(Delivery {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                envelope,
            }))
        })
    }

    fn ack(
        &mut self,
        delivery: &Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = delivery.topic.clone();
        let partition = delivery.partition;
        let offset = delivery.offset;

        Box::pin(async move {
            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| EventBusError::AckFailed(e.to_string()))?;

            self.consumer
                .commit(&offsets, CommitMode::Async)
                .map_err(|e| EventBusError::AckFailed(e.to_string()))?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(RedpandaEventBus::builder().build().is_err());
    }
}
