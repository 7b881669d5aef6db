//! In-memory event bus with per-subscription queues.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use walletd_core::event::Envelope;
use walletd_core::event_bus::{
    topic_matches, BusConsumer, Delivery, EventBus, EventBusError, Subscription,
};

struct SubscriberEntry {
    group: String,
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// In-memory event bus for tests.
///
/// Each subscription gets its own queue (one independent consumer per
/// group, as on the real broker) and every publish is recorded so tests can
/// assert on the exact envelopes that went out. Topic patterns use the same
/// `wallet.#` matching as the production binding.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    published: Mutex<Vec<(String, Envelope)>>,
    next_offset: AtomicI64,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(topic, envelope)` published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.published_lock().clone()
    }

    /// The topics published so far, in order.
    #[must_use]
    pub fn published_topics(&self) -> Vec<String> {
        self.published_lock()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Envelopes published under the given topic.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<Envelope> {
        self.published_lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    fn published_lock(&self) -> MutexGuard<'_, Vec<(String, Envelope)>> {
        self.published
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn subscribers_lock(&self) -> MutexGuard<'_, Vec<SubscriberEntry>> {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();

        Box::pin(async move {
            let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
            self.published_lock().push((topic.clone(), envelope.clone()));

            let delivery = Delivery {
                topic: topic.clone(),
                partition: 0,
                offset,
                envelope,
            };

            let mut subscribers = self.subscribers_lock();
            subscribers.retain(|entry| !entry.tx.is_closed());

            // One delivery per group, as on the real broker: consumers in
            // the same group share the subscription.
            let mut seen_groups = std::collections::HashSet::new();
            for entry in subscribers.iter() {
                if entry.topics.iter().any(|p| topic_matches(p, &topic))
                    && seen_groups.insert(entry.group.clone())
                {
                    let _ = entry.tx.send(delivery.clone());
                }
            }

            Ok(())
        })
    }

    fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusConsumer>, EventBusError>> + Send + '_>>
    {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers_lock().push(SubscriberEntry {
                group: subscription.group,
                topics: subscription.topics,
                tx,
            });
            Ok(Box::new(InMemoryBusConsumer { rx }) as Box<dyn BusConsumer>)
        })
    }
}

/// Consumer half of an in-memory subscription.
pub struct InMemoryBusConsumer {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl BusConsumer for InMemoryBusConsumer {
    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>, EventBusError>> + Send + '_>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }

    fn ack(
        &mut self,
        _delivery: &Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async move { Ok(()) })
    }
}
