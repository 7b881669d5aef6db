//! Generic event bus consumer with reconnection, dead-lettering and
//! graceful shutdown.
//!
//! The subscribe-process-reconnect loop:
//!
//! ```text
//! loop {
//!     subscribe
//!     loop {
//!         recv one delivery
//!         handle:
//!             Ok        → ack
//!             Err       → dead-letter, then ack (reject without requeue)
//!             DLQ write fails → leave unacked, resubscribe (redelivery)
//!         check shutdown signal
//!     }
//!     stream ended / broken → wait retry_delay, resubscribe
//! }
//! ```

use super::{DeadLetterSink, EventHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use walletd_core::event_bus::{BusConsumer, EventBus, Subscription};

/// A long-lived consumer task over one durable subscription.
pub struct EventConsumer {
    name: String,
    subscription: Subscription,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    dead_letters: Arc<dyn DeadLetterSink>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a consumer.
    ///
    /// * `name` — consumer name for logs and dead-letter attribution
    /// * `subscription` — durable group + topics
    /// * `retry_delay` defaults to 5 s; see
    ///   [`EventConsumer::with_retry_delay`]
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        subscription: Subscription,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        dead_letters: Arc<dyn DeadLetterSink>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            subscription,
            event_bus,
            handler,
            dead_letters,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set a custom delay before resubscribing after a failure.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.subscription.topics, "Event consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                subscribed = self.event_bus.subscribe(self.subscription.clone()) => {
                    match subscribed {
                        Ok(consumer) => {
                            info!(consumer = %self.name, "Subscribed to event bus");
                            if self.process(consumer).await {
                                break; // shutdown requested
                            }
                            warn!(
                                consumer = %self.name,
                                "Event stream ended, reconnecting in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe, retrying in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Process deliveries until the stream ends (returns `false`) or
    /// shutdown is requested (returns `true`).
    async fn process(&mut self, mut consumer: Box<dyn BusConsumer>) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown during processing");
                    return true;
                }
                received = consumer.recv() => {
                    match received {
                        Ok(Some(delivery)) => {
                            let start = std::time::Instant::now();

                            match self.handler.handle(&delivery).await {
                                Ok(()) => {
                                    if let Err(e) = consumer.ack(&delivery).await {
                                        error!(consumer = %self.name, error = %e, "Ack failed");
                                        return false; // resubscribe; redelivery is safe
                                    }
                                }
                                Err(handler_error) => {
                                    error!(
                                        consumer = %self.name,
                                        event_type = %delivery.envelope.event_type,
                                        error = %handler_error,
                                        "Failed to handle delivery, dead-lettering"
                                    );
                                    match self
                                        .dead_letters
                                        .record(&self.name, &delivery, &handler_error)
                                        .await
                                    {
                                        Ok(()) => {
                                            if let Err(e) = consumer.ack(&delivery).await {
                                                error!(consumer = %self.name, error = %e, "Ack failed after dead-letter");
                                                return false;
                                            }
                                        }
                                        Err(e) => {
                                            // Can't park it, can't drop it:
                                            // leave unacked and resubscribe
                                            // so the broker redelivers.
                                            error!(consumer = %self.name, error = %e, "Dead-letter write failed");
                                            tokio::time::sleep(self.retry_delay).await;
                                            return false;
                                        }
                                    }
                                }
                            }

                            metrics::histogram!(
                                "consumer.handle.duration_seconds",
                                "consumer" => self.name.clone()
                            )
                            .record(start.elapsed().as_secs_f64());
                        }
                        Ok(None) => {
                            warn!(consumer = %self.name, "Event stream ended");
                            return false;
                        }
                        Err(e) => {
                            error!(consumer = %self.name, error = %e, "Error receiving delivery");
                            // Transient receive error; keep the loop alive.
                        }
                    }
                }
            }
        }
    }
}
