//! The wallet aggregate: a pure state machine over ledger events.
//!
//! No I/O happens here. [`Wallet::fold`] rebuilds state from an event
//! prefix; [`Wallet::deposit`] and [`Wallet::withdraw`] validate a command
//! against that state and emit a single event. Whether the event commits is
//! the repository's problem (optimistic concurrency on append).
//!
//! Wallets are implicit: folding an empty history yields
//! `{balance: 0, version: 0}`, and a first deposit creates the wallet by
//! writing its first event.

use crate::events::{DepositKind, WalletEvent, WithdrawalKind};
use crate::types::{SagaId, WalletId};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use walletd_core::money::Money;
use walletd_core::stream::Version;

/// Validation errors raised by aggregate operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The amount was zero (negative amounts cannot be represented).
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    /// The wallet does not hold enough funds for the debit.
    #[error("Insufficient funds: balance is {balance}, requested {requested}")]
    InsufficientFunds {
        /// Current balance.
        balance: Money,
        /// Requested debit.
        requested: Money,
    },

    /// The deposit would overflow the balance. Not reachable with realistic
    /// ledger values.
    #[error("Deposit would overflow the balance")]
    BalanceOverflow,
}

/// Why a deposit is happening; determines the emitted event's `kind` and
/// transfer context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepositContext {
    /// Direct client deposit.
    Direct,
    /// Credit leg of a transfer.
    TransferIn {
        /// The saga carrying the transfer.
        saga_id: SagaId,
        /// The source wallet.
        from: WalletId,
    },
    /// Compensating refund after a failed transfer.
    Refund {
        /// The saga being compensated.
        saga_id: SagaId,
    },
}

/// Why a withdrawal is happening.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WithdrawContext {
    /// Direct client withdrawal.
    Direct,
    /// Debit leg of a transfer.
    TransferOut {
        /// The saga carrying the transfer.
        saga_id: SagaId,
        /// The destination wallet.
        to: WalletId,
    },
}

/// Derived wallet state: balance plus the version of the last folded event.
///
/// Never persisted — always recomputed from the event prefix. The balance
/// invariant `balance = Σ deposits − Σ withdrawals ≥ 0` holds at every
/// committed version because `withdraw` refuses to emit an event that would
/// break it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Wallet {
    /// The wallet id.
    pub id: WalletId,
    /// Current balance.
    pub balance: Money,
    /// Version of the last event folded in (0 for an unknown wallet).
    pub version: Version,
}

impl Wallet {
    /// An empty wallet (no events yet).
    #[must_use]
    pub const fn empty(id: WalletId) -> Self {
        Self {
            id,
            balance: Money::ZERO,
            version: Version::INITIAL,
        }
    }

    /// Rebuild wallet state by folding events in version order.
    ///
    /// Deterministic and order-sensitive: the same prefix always yields the
    /// same state.
    #[must_use]
    pub fn fold(id: WalletId, events: &[WalletEvent]) -> Self {
        let mut wallet = Self::empty(id);
        for event in events {
            wallet.apply(event);
        }
        wallet
    }

    fn apply(&mut self, event: &WalletEvent) {
        match event {
            WalletEvent::MoneyDeposited {
                amount,
                balance_after,
                ..
            } => {
                // The recorded post-balance is the authority if arithmetic
                // cannot reproduce it (cannot happen with a valid log).
                self.balance = self.balance.checked_add(*amount).unwrap_or(*balance_after);
                self.version = self.version.next();
            }
            WalletEvent::MoneyWithdrawn {
                amount,
                balance_after,
                ..
            } => {
                self.balance = self.balance.checked_sub(*amount).unwrap_or(*balance_after);
                self.version = self.version.next();
            }
            // Transfer lifecycle events never enter a wallet stream.
            _ => {}
        }
    }

    /// Emit a `MoneyDeposited` event.
    ///
    /// # Errors
    ///
    /// - [`WalletError::InvalidAmount`] for a zero amount
    /// - [`WalletError::BalanceOverflow`] if the balance cannot hold the sum
    pub fn deposit(
        &self,
        amount: Money,
        context: DepositContext,
        now: DateTime<Utc>,
    ) -> Result<WalletEvent, WalletError> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount);
        }

        let balance_after = self
            .balance
            .checked_add(amount)
            .ok_or(WalletError::BalanceOverflow)?;

        let (kind, saga_id, counterparty) = match context {
            DepositContext::Direct => (DepositKind::Deposit, None, None),
            DepositContext::TransferIn { saga_id, from } => {
                (DepositKind::TransferIn, Some(saga_id), Some(from))
            }
            DepositContext::Refund { saga_id } => (DepositKind::Refund, Some(saga_id), None),
        };

        Ok(WalletEvent::MoneyDeposited {
            wallet_id: self.id.clone(),
            amount,
            balance_after,
            kind,
            saga_id,
            counterparty,
            transaction_id: Uuid::new_v4(),
            timestamp: now,
        })
    }

    /// Emit a `MoneyWithdrawn` event.
    ///
    /// # Errors
    ///
    /// - [`WalletError::InvalidAmount`] for a zero amount
    /// - [`WalletError::InsufficientFunds`] if `amount > balance`
    pub fn withdraw(
        &self,
        amount: Money,
        context: WithdrawContext,
        now: DateTime<Utc>,
    ) -> Result<WalletEvent, WalletError> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount);
        }

        let balance_after =
            self.balance
                .checked_sub(amount)
                .ok_or(WalletError::InsufficientFunds {
                    balance: self.balance,
                    requested: amount,
                })?;

        let (kind, saga_id, counterparty) = match context {
            WithdrawContext::Direct => (WithdrawalKind::Withdrawal, None, None),
            WithdrawContext::TransferOut { saga_id, to } => {
                (WithdrawalKind::TransferOut, Some(saga_id), Some(to))
            }
        };

        Ok(WalletEvent::MoneyWithdrawn {
            wallet_id: self.id.clone(),
            amount,
            balance_after,
            kind,
            saga_id,
            counterparty,
            transaction_id: Uuid::new_v4(),
            timestamp: now,
        })
    }
}
