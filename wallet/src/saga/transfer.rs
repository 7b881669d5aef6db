//! The transfer saga orchestrator.
//!
//! Drives one transfer through the state machine in [`super`]: persist the
//! saga, debit the source, credit the destination, compensate on credit
//! failure. The source debit is always attempted before the destination
//! credit, and no credit is applied without a committed debit — so neither
//! balance can go negative, and a debit-side failure needs no compensation
//! at all (nothing changed).
//!
//! Self-transfers are allowed: `from == to` degenerates to a withdraw
//! followed by a deposit on the same aggregate, leaving the balance
//! unchanged with two events recorded.

use super::{SagaStatus, SagaStore, SagaStoreError, TransferSaga};
use crate::aggregates::{DepositContext, WalletRepository, WithdrawContext};
use crate::events::WalletEvent;
use crate::types::{SagaId, WalletId};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use walletd_core::environment::Clock;
use walletd_core::event_bus::EventBus;
use walletd_core::money::Money;

/// Infrastructure failures that prevent the orchestrator from recording
/// saga progress. Domain failures (insufficient funds, conflicts) are not
/// errors here — they are [`TransferOutcome`]s.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Saga store or other infrastructure failure.
    #[error("Transfer infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<SagaStoreError> for TransferError {
    fn from(e: SagaStoreError) -> Self {
        Self::Infrastructure(e.to_string())
    }
}

/// The result of driving a transfer saga to rest.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferOutcome {
    /// Both legs committed; saga is `COMPLETED`.
    Completed {
        /// The saga.
        saga_id: SagaId,
        /// Source balance after the debit.
        from_balance: Money,
        /// Destination balance after the credit.
        to_balance: Money,
    },

    /// The transfer did not happen; saga is `FAILED`. If the debit had
    /// committed, the source was refunded first.
    Failed {
        /// The saga.
        saga_id: SagaId,
        /// Why the transfer failed.
        reason: String,
        /// Whether a compensating refund ran (true only when the debit had
        /// committed).
        refunded: bool,
    },

    /// CRITICAL: the credit failed and the refund also failed. The saga
    /// stays in `COMPENSATING`; the source wallet is debited without a
    /// matching credit until the recovery scanner or an operator completes
    /// the refund.
    CompensationFailed {
        /// The saga needing attention.
        saga_id: SagaId,
        /// The combined failure description.
        reason: String,
    },
}

/// Orchestrates transfer sagas over the repository, the saga store and the
/// event bus.
pub struct TransferOrchestrator {
    repository: Arc<WalletRepository>,
    sagas: Arc<dyn SagaStore>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl TransferOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        repository: Arc<WalletRepository>,
        sagas: Arc<dyn SagaStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            sagas,
            event_bus,
            clock,
        }
    }

    /// Run a fresh transfer saga to rest.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Infrastructure`] only when saga progress
    /// itself cannot be recorded; every domain failure is a
    /// [`TransferOutcome`].
    pub async fn run(
        &self,
        from: &WalletId,
        to: &WalletId,
        amount: Money,
    ) -> Result<TransferOutcome, TransferError> {
        let saga_id = SagaId::new();
        let now = self.clock.now();
        let saga = TransferSaga::new(saga_id, from.clone(), to.clone(), amount, now);

        self.sagas.insert(&saga).await?;
        self.publish(WalletEvent::TransferInitiated {
            saga_id,
            from_wallet_id: from.clone(),
            to_wallet_id: to.clone(),
            amount,
            transaction_id: Uuid::new_v4(),
            timestamp: now,
        })
        .await;

        tracing::info!(saga_id = %saga_id, from = %from, to = %to, amount = %amount, "Transfer initiated");

        // Step 2: debit the source. On failure nothing changed, so the saga
        // fails without compensation.
        let debit = match self
            .repository
            .withdraw(
                from,
                amount,
                WithdrawContext::TransferOut {
                    saga_id,
                    to: to.clone(),
                },
            )
            .await
        {
            Ok(debit) => debit,
            Err(e) => {
                let reason = e.to_string();
                self.sagas
                    .mark_failed(saga_id, None, Some(reason.as_str()), self.clock.now())
                    .await?;
                self.publish(self.transfer_failed_event(saga_id, from, to, amount, &reason))
                    .await;

                tracing::info!(saga_id = %saga_id, reason = %reason, "Transfer failed before debit");
                metrics::counter!("saga.transfer.total", "outcome" => "failed_no_debit")
                    .increment(1);

                return Ok(TransferOutcome::Failed {
                    saga_id,
                    reason,
                    refunded: false,
                });
            }
        };

        let debit_tx_id = debit.event.transaction_id();
        self.sagas
            .mark_source_debited(saga_id, debit_tx_id, self.clock.now())
            .await?;
        self.publish(WalletEvent::SourceWalletDebited {
            saga_id,
            wallet_id: from.clone(),
            amount,
            balance_after: debit.balance_after,
            transaction_id: debit_tx_id,
            timestamp: self.clock.now(),
        })
        .await;

        self.credit_or_compensate(saga_id, from, to, amount, debit.balance_after, debit_tx_id)
            .await
    }

    /// Resume a stalled saga from its persisted state (recovery path).
    ///
    /// - `SOURCE_DEBITED`: the credit never ran (or never got recorded);
    ///   attempt it now, with the normal compensation path on failure.
    /// - `COMPENSATING`: retry the refund.
    ///
    /// Terminal and `INITIATED` sagas are not resumable here — the recovery
    /// scanner handles `INITIATED` via [`TransferOrchestrator::abort_initiated`].
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Infrastructure`] when saga progress cannot
    /// be recorded.
    pub async fn resume(&self, saga: &TransferSaga) -> Result<TransferOutcome, TransferError> {
        match saga.status {
            SagaStatus::SourceDebited => {
                let from_balance = self
                    .repository
                    .load(&saga.from_wallet_id)
                    .await
                    .map(|wallet| wallet.balance)
                    .unwrap_or(Money::ZERO);

                self.credit_or_compensate(
                    saga.saga_id,
                    &saga.from_wallet_id,
                    &saga.to_wallet_id,
                    saga.amount,
                    from_balance,
                    saga.debit_tx_id.unwrap_or_else(Uuid::nil),
                )
                .await
            }
            SagaStatus::Compensating => {
                let reason = saga
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "credit failed".to_string());
                self.refund(saga.saga_id, &saga.from_wallet_id, &saga.to_wallet_id, saga.amount, reason)
                    .await
            }
            other => Err(TransferError::Infrastructure(format!(
                "saga {} is not resumable from {other}",
                saga.saga_id
            ))),
        }
    }

    /// Fail a stalled `INITIATED` saga whose debit never committed.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Infrastructure`] when the transition cannot
    /// be recorded.
    pub async fn abort_initiated(
        &self,
        saga: &TransferSaga,
        reason: &str,
    ) -> Result<(), TransferError> {
        self.sagas
            .mark_failed(saga.saga_id, None, Some(reason), self.clock.now())
            .await?;
        self.publish(self.transfer_failed_event(
            saga.saga_id,
            &saga.from_wallet_id,
            &saga.to_wallet_id,
            saga.amount,
            reason,
        ))
        .await;
        Ok(())
    }

    async fn credit_or_compensate(
        &self,
        saga_id: SagaId,
        from: &WalletId,
        to: &WalletId,
        amount: Money,
        from_balance: Money,
        debit_tx_id: Uuid,
    ) -> Result<TransferOutcome, TransferError> {
        match self
            .repository
            .deposit(
                to,
                amount,
                DepositContext::TransferIn {
                    saga_id,
                    from: from.clone(),
                },
            )
            .await
        {
            Ok(credit) => {
                let credit_tx_id = credit.event.transaction_id();
                self.sagas
                    .mark_completed(saga_id, credit_tx_id, self.clock.now())
                    .await?;

                let now = self.clock.now();
                self.publish(WalletEvent::DestinationWalletCredited {
                    saga_id,
                    wallet_id: to.clone(),
                    amount,
                    balance_after: credit.balance_after,
                    transaction_id: credit_tx_id,
                    timestamp: now,
                })
                .await;
                self.publish(WalletEvent::TransferCompleted {
                    saga_id,
                    from_wallet_id: from.clone(),
                    to_wallet_id: to.clone(),
                    amount,
                    transaction_id: Uuid::new_v4(),
                    timestamp: now,
                })
                .await;
                self.publish(WalletEvent::MoneyTransferred {
                    saga_id,
                    from_wallet_id: from.clone(),
                    to_wallet_id: to.clone(),
                    amount,
                    debit_transaction_id: debit_tx_id,
                    credit_transaction_id: credit_tx_id,
                    transaction_id: Uuid::new_v4(),
                    timestamp: now,
                })
                .await;

                tracing::info!(saga_id = %saga_id, "Transfer completed");
                metrics::counter!("saga.transfer.total", "outcome" => "completed").increment(1);

                // Self-transfers: the deposit folded the withdrawal back
                // in, so the credit's post-balance is the source's too.
                let from_balance = if from == to {
                    credit.balance_after
                } else {
                    from_balance
                };

                Ok(TransferOutcome::Completed {
                    saga_id,
                    from_balance,
                    to_balance: credit.balance_after,
                })
            }
            Err(credit_err) => {
                let reason = credit_err.to_string();
                self.sagas
                    .mark_compensating(saga_id, &reason, self.clock.now())
                    .await?;
                self.publish(WalletEvent::CompensationInitiated {
                    saga_id,
                    wallet_id: from.clone(),
                    amount,
                    reason: reason.clone(),
                    transaction_id: Uuid::new_v4(),
                    timestamp: self.clock.now(),
                })
                .await;

                tracing::warn!(saga_id = %saga_id, reason = %reason, "Credit failed, compensating");

                self.refund(saga_id, from, to, amount, reason).await
            }
        }
    }

    async fn refund(
        &self,
        saga_id: SagaId,
        from: &WalletId,
        to: &WalletId,
        amount: Money,
        reason: String,
    ) -> Result<TransferOutcome, TransferError> {
        match self
            .repository
            .deposit(from, amount, DepositContext::Refund { saga_id })
            .await
        {
            Ok(refund) => {
                let refund_tx_id = refund.event.transaction_id();
                let failure_reason = format!("Transfer failed, source wallet refunded: {reason}");
                self.sagas
                    .mark_failed(
                        saga_id,
                        Some(refund_tx_id),
                        Some(failure_reason.as_str()),
                        self.clock.now(),
                    )
                    .await?;

                let now = self.clock.now();
                self.publish(WalletEvent::SourceWalletRefunded {
                    saga_id,
                    wallet_id: from.clone(),
                    amount,
                    transaction_id: refund_tx_id,
                    timestamp: now,
                })
                .await;
                self.publish(self.transfer_failed_event(saga_id, from, to, amount, &failure_reason))
                    .await;

                tracing::info!(saga_id = %saga_id, "Transfer compensated and failed");
                metrics::counter!("saga.transfer.total", "outcome" => "compensated").increment(1);

                Ok(TransferOutcome::Failed {
                    saga_id,
                    reason: failure_reason,
                    refunded: true,
                })
            }
            Err(refund_err) => {
                // The saga stays in COMPENSATING: the source is debited
                // with no matching credit until the recovery scanner or an
                // operator lands the refund.
                let combined = format!("{reason}; refund failed: {refund_err}");
                tracing::error!(
                    saga_id = %saga_id,
                    wallet_id = %from,
                    amount = %amount,
                    error = %combined,
                    "CRITICAL: compensation failed, saga requires operator attention"
                );
                metrics::counter!("saga.transfer.total", "outcome" => "compensation_failed")
                    .increment(1);

                Ok(TransferOutcome::CompensationFailed {
                    saga_id,
                    reason: combined,
                })
            }
        }
    }

    fn transfer_failed_event(
        &self,
        saga_id: SagaId,
        from: &WalletId,
        to: &WalletId,
        amount: Money,
        reason: &str,
    ) -> WalletEvent {
        WalletEvent::TransferFailed {
            saga_id,
            from_wallet_id: from.clone(),
            to_wallet_id: to.clone(),
            amount,
            reason: reason.to_string(),
            transaction_id: Uuid::new_v4(),
            timestamp: self.clock.now(),
        }
    }

    async fn publish(&self, event: WalletEvent) {
        let envelope = match event.to_envelope(self.clock.now()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(event_type = event.event_type(), error = %e, "Failed to serialize saga event");
                return;
            }
        };

        if let Err(e) = self.event_bus.publish(event.routing_key(), &envelope).await {
            tracing::warn!(
                event_type = event.event_type(),
                error = %e,
                "Best-effort publish of saga event failed"
            );
        }
    }
}
