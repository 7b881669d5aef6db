//! The closed set of wallet and transfer events.
//!
//! [`WalletEvent`] is an internally tagged enum: the tag is a stable dotted
//! string (`wallet.money.deposited`) that is simultaneously the event type
//! in the log, the `eventType` of the bus envelope and the routing key the
//! event is published under. Consumers dispatch with exhaustive matching —
//! an unknown tag is a hard deserialization error, never a silent skip.
//!
//! Two families:
//!
//! - **Ledger events** (`MoneyDeposited`, `MoneyWithdrawn`) are appended to
//!   a wallet's stream and carry `balance_after` — the authoritative
//!   post-state the projections set (never increment). Their `kind` field
//!   tells the transaction projection whether a deposit is a plain deposit,
//!   the credit leg of a transfer, or a compensating refund.
//! - **Transfer lifecycle events** (`TransferInitiated` through
//!   `TransferFailed`, plus the `MoneyTransferred` summary) are published by
//!   the saga for observers; they never enter a wallet stream.

use crate::types::{SagaId, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use walletd_core::event::{Envelope, EventError, PendingEvent};
use walletd_core::money::Money;

/// All routing keys the service publishes, in one place.
///
/// A `wallet.#` binding catches every one of them.
pub const ALL_TOPICS: [&str; 10] = [
    topics::MONEY_DEPOSITED,
    topics::MONEY_WITHDRAWN,
    topics::MONEY_TRANSFERRED,
    topics::TRANSFER_INITIATED,
    topics::TRANSFER_SOURCE_DEBITED,
    topics::TRANSFER_DESTINATION_CREDITED,
    topics::TRANSFER_COMPLETED,
    topics::TRANSFER_COMPENSATION_INITIATED,
    topics::TRANSFER_SOURCE_REFUNDED,
    topics::TRANSFER_FAILED,
];

/// Transactional topics the projection and fraud consumers subscribe to.
pub const MONEY_TOPICS: [&str; 3] = [
    topics::MONEY_DEPOSITED,
    topics::MONEY_WITHDRAWN,
    topics::MONEY_TRANSFERRED,
];

/// Routing key constants.
pub mod topics {
    /// Money was deposited into a wallet.
    pub const MONEY_DEPOSITED: &str = "wallet.money.deposited";
    /// Money was withdrawn from a wallet.
    pub const MONEY_WITHDRAWN: &str = "wallet.money.withdrawn";
    /// A transfer completed (summary of both legs).
    pub const MONEY_TRANSFERRED: &str = "wallet.money.transferred";
    /// A transfer saga started.
    pub const TRANSFER_INITIATED: &str = "wallet.transfer.initiated";
    /// The source wallet was debited.
    pub const TRANSFER_SOURCE_DEBITED: &str = "wallet.transfer.source.debited";
    /// The destination wallet was credited.
    pub const TRANSFER_DESTINATION_CREDITED: &str = "wallet.transfer.destination.credited";
    /// The transfer reached its happy terminal state.
    pub const TRANSFER_COMPLETED: &str = "wallet.transfer.completed";
    /// Compensation (refund of the source) started.
    pub const TRANSFER_COMPENSATION_INITIATED: &str = "wallet.transfer.compensation.initiated";
    /// The source wallet was refunded during compensation.
    pub const TRANSFER_SOURCE_REFUNDED: &str = "wallet.transfer.source.refunded";
    /// The transfer failed (with or without a refund).
    pub const TRANSFER_FAILED: &str = "wallet.transfer.failed";
}

/// Why money entered a wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositKind {
    /// Direct client deposit.
    Deposit,
    /// Credit leg of a transfer.
    TransferIn,
    /// Compensating refund after a failed transfer.
    Refund,
}

/// Why money left a wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalKind {
    /// Direct client withdrawal.
    Withdrawal,
    /// Debit leg of a transfer.
    TransferOut,
}

/// Every event the wallet service records or publishes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum WalletEvent {
    /// Money entered a wallet. Ledger event; appended to the wallet stream.
    #[serde(rename = "wallet.money.deposited", rename_all = "camelCase")]
    MoneyDeposited {
        /// The wallet that was credited.
        wallet_id: WalletId,
        /// The credited amount.
        amount: Money,
        /// Authoritative balance after this event.
        balance_after: Money,
        /// Why the money entered.
        kind: DepositKind,
        /// Saga this leg belongs to, for transfer/refund kinds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        saga_id: Option<SagaId>,
        /// The other wallet of a transfer, when there is one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counterparty: Option<WalletId>,
        /// Fresh id for this ledger entry; projection dedup key.
        transaction_id: Uuid,
        /// When the event occurred.
        timestamp: DateTime<Utc>,
    },

    /// Money left a wallet. Ledger event; appended to the wallet stream.
    #[serde(rename = "wallet.money.withdrawn", rename_all = "camelCase")]
    MoneyWithdrawn {
        /// The wallet that was debited.
        wallet_id: WalletId,
        /// The debited amount.
        amount: Money,
        /// Authoritative balance after this event.
        balance_after: Money,
        /// Why the money left.
        kind: WithdrawalKind,
        /// Saga this leg belongs to, for the transfer kind.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        saga_id: Option<SagaId>,
        /// The other wallet of a transfer, when there is one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counterparty: Option<WalletId>,
        /// Fresh id for this ledger entry; projection dedup key.
        transaction_id: Uuid,
        /// When the event occurred.
        timestamp: DateTime<Utc>,
    },

    /// Summary published when a transfer completes: both wallets, both leg
    /// transaction ids. For observers and audit only — the per-leg
    /// `MoneyDeposited`/`MoneyWithdrawn` events are the ones consumers
    /// evaluate, so the summary never double-counts against either wallet.
    #[serde(rename = "wallet.money.transferred", rename_all = "camelCase")]
    MoneyTransferred {
        /// The saga that carried this transfer.
        saga_id: SagaId,
        /// Source wallet.
        from_wallet_id: WalletId,
        /// Destination wallet.
        to_wallet_id: WalletId,
        /// Transferred amount.
        amount: Money,
        /// Transaction id of the debit leg.
        debit_transaction_id: Uuid,
        /// Transaction id of the credit leg.
        credit_transaction_id: Uuid,
        /// Fresh id for this summary event.
        transaction_id: Uuid,
        /// When the transfer completed.
        timestamp: DateTime<Utc>,
    },

    /// A transfer saga was created and persisted in `INITIATED`.
    #[serde(rename = "wallet.transfer.initiated", rename_all = "camelCase")]
    TransferInitiated {
        /// The new saga.
        saga_id: SagaId,
        /// Source wallet.
        from_wallet_id: WalletId,
        /// Destination wallet.
        to_wallet_id: WalletId,
        /// Requested amount.
        amount: Money,
        /// Fresh id for this lifecycle event.
        transaction_id: Uuid,
        /// When the saga started.
        timestamp: DateTime<Utc>,
    },

    /// The source wallet's debit committed.
    #[serde(rename = "wallet.transfer.source.debited", rename_all = "camelCase")]
    SourceWalletDebited {
        /// The saga.
        saga_id: SagaId,
        /// The debited wallet.
        wallet_id: WalletId,
        /// The debited amount.
        amount: Money,
        /// Source balance after the debit.
        balance_after: Money,
        /// Transaction id of the debit leg.
        transaction_id: Uuid,
        /// When the debit committed.
        timestamp: DateTime<Utc>,
    },

    /// The destination wallet's credit committed.
    #[serde(
        rename = "wallet.transfer.destination.credited",
        rename_all = "camelCase"
    )]
    DestinationWalletCredited {
        /// The saga.
        saga_id: SagaId,
        /// The credited wallet.
        wallet_id: WalletId,
        /// The credited amount.
        amount: Money,
        /// Destination balance after the credit.
        balance_after: Money,
        /// Transaction id of the credit leg.
        transaction_id: Uuid,
        /// When the credit committed.
        timestamp: DateTime<Utc>,
    },

    /// The saga reached `COMPLETED`.
    #[serde(rename = "wallet.transfer.completed", rename_all = "camelCase")]
    TransferCompleted {
        /// The saga.
        saga_id: SagaId,
        /// Source wallet.
        from_wallet_id: WalletId,
        /// Destination wallet.
        to_wallet_id: WalletId,
        /// Transferred amount.
        amount: Money,
        /// Fresh id for this lifecycle event.
        transaction_id: Uuid,
        /// When the saga completed.
        timestamp: DateTime<Utc>,
    },

    /// The credit failed; the saga entered `COMPENSATING`.
    #[serde(
        rename = "wallet.transfer.compensation.initiated",
        rename_all = "camelCase"
    )]
    CompensationInitiated {
        /// The saga.
        saga_id: SagaId,
        /// The wallet to be refunded (the source).
        wallet_id: WalletId,
        /// The amount to refund.
        amount: Money,
        /// Why the credit failed.
        reason: String,
        /// Fresh id for this lifecycle event.
        transaction_id: Uuid,
        /// When compensation started.
        timestamp: DateTime<Utc>,
    },

    /// The compensating refund committed.
    #[serde(rename = "wallet.transfer.source.refunded", rename_all = "camelCase")]
    SourceWalletRefunded {
        /// The saga.
        saga_id: SagaId,
        /// The refunded wallet.
        wallet_id: WalletId,
        /// The refunded amount.
        amount: Money,
        /// Transaction id of the refund leg.
        transaction_id: Uuid,
        /// When the refund committed.
        timestamp: DateTime<Utc>,
    },

    /// The saga reached `FAILED` (with or without a prior refund).
    #[serde(rename = "wallet.transfer.failed", rename_all = "camelCase")]
    TransferFailed {
        /// The saga.
        saga_id: SagaId,
        /// Source wallet.
        from_wallet_id: WalletId,
        /// Destination wallet.
        to_wallet_id: WalletId,
        /// Requested amount.
        amount: Money,
        /// Why the transfer failed.
        reason: String,
        /// Fresh id for this lifecycle event.
        transaction_id: Uuid,
        /// When the saga failed.
        timestamp: DateTime<Utc>,
    },
}

impl WalletEvent {
    /// The stable dotted tag of this event — also its routing key.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MoneyDeposited { .. } => topics::MONEY_DEPOSITED,
            Self::MoneyWithdrawn { .. } => topics::MONEY_WITHDRAWN,
            Self::MoneyTransferred { .. } => topics::MONEY_TRANSFERRED,
            Self::TransferInitiated { .. } => topics::TRANSFER_INITIATED,
            Self::SourceWalletDebited { .. } => topics::TRANSFER_SOURCE_DEBITED,
            Self::DestinationWalletCredited { .. } => topics::TRANSFER_DESTINATION_CREDITED,
            Self::TransferCompleted { .. } => topics::TRANSFER_COMPLETED,
            Self::CompensationInitiated { .. } => topics::TRANSFER_COMPENSATION_INITIATED,
            Self::SourceWalletRefunded { .. } => topics::TRANSFER_SOURCE_REFUNDED,
            Self::TransferFailed { .. } => topics::TRANSFER_FAILED,
        }
    }

    /// The routing key this event is published under.
    #[must_use]
    pub const fn routing_key(&self) -> &'static str {
        self.event_type()
    }

    /// The transaction id of this event.
    #[must_use]
    pub const fn transaction_id(&self) -> Uuid {
        match self {
            Self::MoneyDeposited { transaction_id, .. }
            | Self::MoneyWithdrawn { transaction_id, .. }
            | Self::MoneyTransferred { transaction_id, .. }
            | Self::TransferInitiated { transaction_id, .. }
            | Self::SourceWalletDebited { transaction_id, .. }
            | Self::DestinationWalletCredited { transaction_id, .. }
            | Self::TransferCompleted { transaction_id, .. }
            | Self::CompensationInitiated { transaction_id, .. }
            | Self::SourceWalletRefunded { transaction_id, .. }
            | Self::TransferFailed { transaction_id, .. } => *transaction_id,
        }
    }

    /// When this event occurred.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::MoneyDeposited { timestamp, .. }
            | Self::MoneyWithdrawn { timestamp, .. }
            | Self::MoneyTransferred { timestamp, .. }
            | Self::TransferInitiated { timestamp, .. }
            | Self::SourceWalletDebited { timestamp, .. }
            | Self::DestinationWalletCredited { timestamp, .. }
            | Self::TransferCompleted { timestamp, .. }
            | Self::CompensationInitiated { timestamp, .. }
            | Self::SourceWalletRefunded { timestamp, .. }
            | Self::TransferFailed { timestamp, .. } => *timestamp,
        }
    }

    /// The post-event balance, for ledger events.
    #[must_use]
    pub const fn balance_after(&self) -> Option<Money> {
        match self {
            Self::MoneyDeposited { balance_after, .. }
            | Self::MoneyWithdrawn { balance_after, .. } => Some(*balance_after),
            _ => None,
        }
    }

    /// Convert to a pending event for appending to the log.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn to_pending(&self) -> Result<PendingEvent, EventError> {
        let payload =
            serde_json::to_value(self).map_err(|e| EventError::Serialization(e.to_string()))?;
        Ok(PendingEvent::new(
            self.event_type(),
            payload,
            self.transaction_id(),
            self.timestamp(),
        ))
    }

    /// Convert to the bus wire envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn to_envelope(&self, published_at: DateTime<Utc>) -> Result<Envelope, EventError> {
        let data =
            serde_json::to_value(self).map_err(|e| EventError::Serialization(e.to_string()))?;
        Ok(Envelope::new(self.event_type(), data, published_at))
    }

    /// Parse an event from a stored payload or envelope `data` field.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventType`] for an unrecognized tag and
    /// [`EventError::Deserialization`] for a malformed payload.
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, EventError> {
        let tag = payload
            .get("eventType")
            .and_then(serde_json::Value::as_str)
            .map(ToOwned::to_owned);

        serde_json::from_value(payload).map_err(|e| match tag {
            Some(tag) if !ALL_TOPICS.contains(&tag.as_str()) => EventError::UnknownEventType(tag),
            _ => EventError::Deserialization(e.to_string()),
        })
    }

    /// Parse an event from a bus envelope.
    ///
    /// # Errors
    ///
    /// Same as [`WalletEvent::from_payload`].
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, EventError> {
        Self::from_payload(envelope.data.clone())
    }
}
