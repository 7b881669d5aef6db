//! Event bus abstraction: durable topic publish, manual-ack consumption.
//!
//! Committed events flow from the event log through the bus to the
//! projection and fraud consumers. The bus never replaces the log — it is a
//! distribution channel with at-least-once semantics, so every consumer must
//! be idempotent.
//!
//! # Delivery contract
//!
//! - Each consumer subscribes under its own durable group name and receives
//!   every matching event independently of other consumers.
//! - Delivery is at-least-once with **manual acknowledgment**: a delivery is
//!   only considered handled once [`BusConsumer::ack`] is called. A crash
//!   between handling and ack causes redelivery.
//! - Consumers process one delivery at a time (recv → handle → ack), which
//!   is the prefetch-1 backpressure model.
//! - A delivery a consumer cannot handle is recorded to the dead-letter
//!   store and then acked, so it is never redelivered automatically.
//!
//! # Ordering
//!
//! Order is preserved per routing key only. Consumers must not rely on
//! cross-key order (a wallet's deposit and withdrawal travel under different
//! keys).

use crate::event::Envelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for group '{group}': {reason}")]
    SubscriptionFailed {
        /// The consumer group that failed to subscribe.
        group: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to deserialize an envelope from the wire.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Failed to commit an acknowledged offset.
    #[error("Ack failed: {0}")]
    AckFailed(String),

    /// Network or transport error.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A named durable subscription over a set of topics.
///
/// Topics may be exact routing keys (`wallet.money.deposited`) or a
/// trailing-wildcard pattern (`wallet.#`) matching every key under a prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    /// Durable consumer group name; one group per independent consumer.
    pub group: String,

    /// Topics or patterns this consumer binds to.
    pub topics: Vec<String>,
}

impl Subscription {
    /// Create a subscription.
    #[must_use]
    pub fn new(group: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            group: group.into(),
            topics,
        }
    }
}

/// A single in-flight delivery from the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// The routing key / topic the envelope arrived on.
    pub topic: String,

    /// Broker partition (0 for single-partition and in-memory buses).
    pub partition: i32,

    /// Broker offset of this delivery within its partition.
    pub offset: i64,

    /// The event envelope.
    pub envelope: Envelope,
}

/// Consumer half of a subscription: pull deliveries, acknowledge them.
///
/// Implementations hold broker state (offsets, connections) and are owned by
/// a single consumer loop; they are `Send` but deliberately not `Sync`.
pub trait BusConsumer: Send {
    /// Receive the next delivery.
    ///
    /// Returns `Ok(None)` when the subscription's stream has ended (broker
    /// shutdown, channel closed); the caller should resubscribe.
    ///
    /// # Errors
    ///
    /// Returns a transport or deserialization error for a delivery that
    /// could not be received; the consumer loop logs and continues.
    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>, EventBusError>> + Send + '_>>;

    /// Acknowledge a delivery, marking it handled.
    ///
    /// Until acked, the delivery is redelivered after a crash — which is why
    /// consumers must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::AckFailed`] if the offset commit fails.
    fn ack(
        &mut self,
        delivery: &Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;
}

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the publisher side is shared
/// across request handlers behind an `Arc<dyn EventBus>`.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the bus can be injected
/// as a trait object into repositories, sagas and consumers.
pub trait EventBus: Send + Sync {
    /// Publish an envelope under a routing key.
    ///
    /// Messages are durable: a broker restart does not lose acknowledged
    /// publishes.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish fails. The
    /// caller decides whether that is fatal; the repository treats it as
    /// best-effort since the event is already committed to the log.
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Open a consumer for a durable subscription.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the consumer cannot
    /// be created.
    fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusConsumer>, EventBusError>> + Send + '_>>;
}

/// Check whether a topic matches a subscription topic or pattern.
///
/// A pattern ending in `.#` matches every topic under its prefix, mirroring
/// a topic-exchange binding: `wallet.#` matches `wallet.money.deposited` and
/// `wallet.transfer.failed` but not `fraud.alert`.
///
/// # Examples
///
/// ```
/// use walletd_core::event_bus::topic_matches;
///
/// assert!(topic_matches("wallet.money.deposited", "wallet.money.deposited"));
/// assert!(topic_matches("wallet.#", "wallet.transfer.failed"));
/// assert!(!topic_matches("wallet.#", "fraud.alert"));
/// ```
#[must_use]
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".#") {
        topic.strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
    } else {
        pattern == topic
    }
}
