//! The projection consumer's event handler.
//!
//! Consumes the transactional wallet topics and folds each ledger event
//! into the read models. Idempotent under redelivery: the wallet balance is
//! SET from `balance_after` and the transaction row's primary key absorbs
//! duplicates.
//!
//! Deposit and withdrawal travel on different routing keys, and cross-key
//! order is not guaranteed, so the projected balance can transiently show
//! an older event's `balance_after` until the stream drains. The write side
//! stays authoritative; replay converges.

use super::{
    ProjectionError, RecordOutcome, TransactionReadModel, TransactionRow, WalletReadModel,
};
use crate::events::{DepositKind, WalletEvent, WithdrawalKind};
use crate::runtime::{EventHandler, HandlerError};
use crate::types::TransactionKind;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;
use walletd_core::event_bus::Delivery;

impl From<ProjectionError> for HandlerError {
    fn from(e: ProjectionError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Applies wallet events to the read models.
pub struct ProjectionHandler {
    wallets: Arc<dyn WalletReadModel>,
    transactions: Arc<dyn TransactionReadModel>,
}

impl ProjectionHandler {
    /// Consumer name used for the durable group and dead letters.
    pub const NAME: &'static str = "projections";

    /// Create a handler over the two read models.
    #[must_use]
    pub fn new(
        wallets: Arc<dyn WalletReadModel>,
        transactions: Arc<dyn TransactionReadModel>,
    ) -> Self {
        Self {
            wallets,
            transactions,
        }
    }

    fn transaction_row_id(kind: TransactionKind, transaction_id: Uuid) -> String {
        match kind {
            TransactionKind::TransferIn => format!("{transaction_id}-in"),
            TransactionKind::TransferOut => format!("{transaction_id}-out"),
            _ => transaction_id.to_string(),
        }
    }
}

#[async_trait]
impl EventHandler for ProjectionHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let event = WalletEvent::from_envelope(&delivery.envelope)
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;

        let row = match event {
            WalletEvent::MoneyDeposited {
                wallet_id,
                amount,
                balance_after,
                kind,
                counterparty,
                transaction_id,
                timestamp,
                ..
            } => {
                let kind = match kind {
                    DepositKind::Deposit => TransactionKind::Deposit,
                    DepositKind::TransferIn => TransactionKind::TransferIn,
                    DepositKind::Refund => TransactionKind::Refund,
                };
                self.wallets
                    .upsert_balance(&wallet_id, balance_after, timestamp)
                    .await?;
                TransactionRow {
                    id: Self::transaction_row_id(kind, transaction_id),
                    wallet_id,
                    kind,
                    amount,
                    balance_after,
                    related_wallet_id: counterparty,
                    timestamp,
                }
            }
            WalletEvent::MoneyWithdrawn {
                wallet_id,
                amount,
                balance_after,
                kind,
                counterparty,
                transaction_id,
                timestamp,
                ..
            } => {
                let kind = match kind {
                    WithdrawalKind::Withdrawal => TransactionKind::Withdrawal,
                    WithdrawalKind::TransferOut => TransactionKind::TransferOut,
                };
                self.wallets
                    .upsert_balance(&wallet_id, balance_after, timestamp)
                    .await?;
                TransactionRow {
                    id: Self::transaction_row_id(kind, transaction_id),
                    wallet_id,
                    kind,
                    amount,
                    balance_after,
                    related_wallet_id: counterparty,
                    timestamp,
                }
            }
            // The transfer summary and lifecycle events carry no ledger
            // entries; the per-leg deposited/withdrawn events above do.
            _ => return Ok(()),
        };

        match self.transactions.record(&row).await? {
            RecordOutcome::Applied => {
                metrics::counter!("projections.applied").increment(1);
            }
            RecordOutcome::AlreadyApplied => {
                tracing::debug!(row_id = %row.id, "Duplicate delivery, projection row exists");
                metrics::counter!("projections.duplicates").increment(1);
            }
        }

        Ok(())
    }
}
