//! Domain identifiers and shared value types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use walletd_core::stream::StreamId;

/// Aggregate type tag for wallet streams in the event log.
pub const WALLET_AGGREGATE_TYPE: &str = "wallet";

/// Unique identifier for a wallet.
///
/// Wallet ids are opaque client-supplied strings; the service never mints
/// them. A wallet exists as soon as it has one event — there is no explicit
/// "create wallet" command.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    /// Create a `WalletId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The event stream this wallet's history lives in.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        StreamId::new(self.0.clone())
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WalletId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WalletId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a transfer saga.
///
/// Ties the debit, credit and (if needed) refund legs of one transfer
/// together; each leg still has its own transaction id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Creates a new random `SagaId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `SagaId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row type in the transaction read model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// A direct deposit.
    Deposit,
    /// A direct withdrawal.
    Withdrawal,
    /// The credit leg of a transfer.
    TransferIn,
    /// The debit leg of a transfer.
    TransferOut,
    /// A compensating refund after a failed transfer.
    Refund,
}

impl TransactionKind {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::TransferIn => "TRANSFER_IN",
            Self::TransferOut => "TRANSFER_OUT",
            Self::Refund => "REFUND",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(Self::Deposit),
            "WITHDRAWAL" => Some(Self::Withdrawal),
            "TRANSFER_IN" => Some(Self::TransferIn),
            "TRANSFER_OUT" => Some(Self::TransferOut),
            "REFUND" => Some(Self::Refund),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wallet_id_is_transparent_in_json() {
        let id = WalletId::new("w1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"w1\"");
        let back: WalletId = serde_json::from_str("\"w1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn wallet_id_maps_to_stream() {
        assert_eq!(WalletId::new("w1").stream_id().as_str(), "w1");
    }

    #[test]
    fn transaction_kind_roundtrip() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdrawal,
            TransactionKind::TransferIn,
            TransactionKind::TransferOut,
            TransactionKind::Refund,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::parse("bogus"), None);
    }

    #[test]
    fn saga_ids_are_unique() {
        assert_ne!(SagaId::new(), SagaId::new());
    }
}
