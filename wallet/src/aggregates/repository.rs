//! The aggregate repository: load → fold → decide → append → publish.
//!
//! One protocol for every single-wallet command:
//!
//! 1. Load the wallet's events and fold them into state; the fold length is
//!    the expected append version.
//! 2. Run the operation against the folded state (pure validation).
//! 3. Append the new event at the expected version. A concurrent writer
//!    surfaces as [`CommandError::Conflict`] — nothing was written, and the
//!    caller decides whether to re-execute.
//! 4. Publish the committed event to the bus, best-effort. Publish failure
//!    never rolls back the log: the event is committed, and a crash between
//!    commit and publish loses only the asynchronous projection update, not
//!    ledger state. A transactional outbox would close that window at the
//!    cost of a drain process; read models can always be rebuilt from the
//!    log.

use crate::aggregates::wallet::{DepositContext, Wallet, WalletError, WithdrawContext};
use crate::events::WalletEvent;
use crate::types::{WalletId, WALLET_AGGREGATE_TYPE};
use std::sync::Arc;
use thiserror::Error;
use walletd_core::environment::Clock;
use walletd_core::event_bus::EventBus;
use walletd_core::event_store::{EventStore, EventStoreError};
use walletd_core::money::Money;
use walletd_core::stream::Version;

/// Errors surfaced by repository command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Aggregate validation failed (invalid amount, insufficient funds).
    /// Not retryable without changing the request or the wallet state.
    #[error(transparent)]
    Domain(#[from] WalletError),

    /// A concurrent writer committed first. Safe to retry by re-executing
    /// the whole protocol.
    #[error("Concurrent update on wallet {wallet_id}")]
    Conflict {
        /// The contended wallet.
        wallet_id: WalletId,
    },

    /// Storage or serialization failure. Retryable; the log holds no
    /// partial state.
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),
}

impl CommandError {
    /// Whether a retry with the same inputs can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Infrastructure(_))
    }
}

/// A committed command: the recorded event plus its post-state.
#[derive(Clone, Debug)]
pub struct Committed {
    /// The event that was appended and (best-effort) published.
    pub event: WalletEvent,
    /// The wallet balance after the event.
    pub balance_after: Money,
    /// The version the event committed at.
    pub version: Version,
}

/// Repository for the wallet aggregate.
///
/// Collaborators are injected at construction; there are no globals.
pub struct WalletRepository {
    event_store: Arc<dyn EventStore>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl WalletRepository {
    /// Create a repository.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            event_store,
            event_bus,
            clock,
        }
    }

    /// Deposit into a wallet (creating it on first deposit).
    ///
    /// # Errors
    ///
    /// See [`CommandError`].
    pub async fn deposit(
        &self,
        wallet_id: &WalletId,
        amount: Money,
        context: DepositContext,
    ) -> Result<Committed, CommandError> {
        let now = self.clock.now();
        self.execute(wallet_id, |wallet| wallet.deposit(amount, context, now))
            .await
    }

    /// Withdraw from a wallet.
    ///
    /// # Errors
    ///
    /// See [`CommandError`].
    pub async fn withdraw(
        &self,
        wallet_id: &WalletId,
        amount: Money,
        context: WithdrawContext,
    ) -> Result<Committed, CommandError> {
        let now = self.clock.now();
        self.execute(wallet_id, |wallet| wallet.withdraw(amount, context, now))
            .await
    }

    /// Load and fold a wallet's current state without writing anything.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Infrastructure`] if the load fails — a load
    /// failure is fatal to the command in progress.
    pub async fn load(&self, wallet_id: &WalletId) -> Result<Wallet, CommandError> {
        let events = self.load_events(wallet_id).await?;
        Ok(Wallet::fold(wallet_id.clone(), &events))
    }

    /// Find the transaction id of a committed transfer-out leg for the
    /// given saga in this wallet's stream, if one exists. Used by saga
    /// recovery to tell a stalled-but-debited saga from one that never
    /// moved.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Infrastructure`] if the load fails.
    pub async fn find_transfer_debit(
        &self,
        wallet_id: &WalletId,
        saga_id: crate::types::SagaId,
    ) -> Result<Option<uuid::Uuid>, CommandError> {
        let events = self.load_events(wallet_id).await?;
        Ok(events.iter().find_map(|event| match event {
            WalletEvent::MoneyWithdrawn {
                saga_id: Some(event_saga),
                transaction_id,
                ..
            } if *event_saga == saga_id => Some(*transaction_id),
            _ => None,
        }))
    }

    async fn load_events(&self, wallet_id: &WalletId) -> Result<Vec<WalletEvent>, CommandError> {
        let records = self
            .event_store
            .load(wallet_id.stream_id())
            .await
            .map_err(|e| CommandError::Infrastructure(e.to_string()))?;

        let mut events = Vec::with_capacity(records.len());
        for record in records {
            events.push(
                WalletEvent::from_payload(record.payload)
                    .map_err(|e| CommandError::Infrastructure(e.to_string()))?,
            );
        }
        Ok(events)
    }

    async fn execute<F>(&self, wallet_id: &WalletId, op: F) -> Result<Committed, CommandError>
    where
        F: FnOnce(&Wallet) -> Result<WalletEvent, WalletError>,
    {
        let start = std::time::Instant::now();
        let wallet = self.load(wallet_id).await?;
        let base_version = wallet.version;

        let event = op(&wallet)?;
        let balance_after = event.balance_after().ok_or_else(|| {
            CommandError::Infrastructure("aggregate emitted a non-ledger event".to_string())
        })?;

        let pending = event
            .to_pending()
            .map_err(|e| CommandError::Infrastructure(e.to_string()))?;

        let recorded = self
            .event_store
            .append(
                wallet_id.stream_id(),
                WALLET_AGGREGATE_TYPE,
                base_version,
                vec![pending],
            )
            .await
            .map_err(|e| match e {
                EventStoreError::ConcurrencyConflict { .. } => CommandError::Conflict {
                    wallet_id: wallet_id.clone(),
                },
                other => CommandError::Infrastructure(other.to_string()),
            })?;

        let version = recorded
            .last()
            .map_or_else(|| base_version.next(), |event| event.version);

        self.publish_best_effort(&event).await;

        tracing::debug!(
            wallet_id = %wallet_id,
            event_type = event.event_type(),
            version = %version,
            balance_after = %balance_after,
            "Command committed"
        );
        metrics::histogram!("repository.execute.duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(Committed {
            event,
            balance_after,
            version,
        })
    }

    async fn publish_best_effort(&self, event: &WalletEvent) {
        let envelope = match event.to_envelope(self.clock.now()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    event_type = event.event_type(),
                    error = %e,
                    "Failed to serialize committed event for publishing"
                );
                return;
            }
        };

        if let Err(e) = self.event_bus.publish(event.routing_key(), &envelope).await {
            // The event is committed; consumers will observe it on the next
            // replay/rebuild even though this publish was lost.
            tracing::warn!(
                event_type = event.event_type(),
                transaction_id = %event.transaction_id(),
                error = %e,
                "Best-effort publish of committed event failed"
            );
            metrics::counter!("repository.publish.failures").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_retryable_domain_is_not() {
        assert!(CommandError::Conflict {
            wallet_id: WalletId::new("w1")
        }
        .is_retryable());
        assert!(CommandError::Infrastructure("db down".to_string()).is_retryable());
        assert!(!CommandError::Domain(WalletError::InvalidAmount).is_retryable());
    }
}
