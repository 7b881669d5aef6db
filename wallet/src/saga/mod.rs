//! Transfer saga: state, persistence and orchestration.
//!
//! Two wallets under optimistic concurrency cannot be committed atomically,
//! so a transfer is a saga: debit the source, credit the destination, and
//! compensate (refund the source) if the credit fails after the debit
//! committed. The state machine:
//!
//! ```text
//! start ─create─► INITIATED ─debit_ok─► SOURCE_DEBITED ─credit_ok─► COMPLETED*
//!                     │debit_fail            │credit_fail
//!                     ▼                      ▼
//!                  FAILED*               COMPENSATING ─refund_ok─► FAILED*
//!                                            │refund_fail
//!                                            ▼
//!                                       COMPENSATING (terminal, manual)
//! ```
//!
//! Transitions are one-way and terminal states are never rewritten — the
//! store enforces this with status-guarded updates, so a replayed or racing
//! transition is an [`SagaStoreError::InvalidTransition`], not a silent
//! overwrite. A saga stuck in `COMPENSATING` is the "needs a human" state:
//! it stays visible to the recovery scanner and to operators.

pub mod postgres;
pub mod transfer;

pub use postgres::PostgresSagaStore;
pub use transfer::{TransferError, TransferOrchestrator, TransferOutcome};

use crate::types::{SagaId, WalletId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use walletd_core::money::Money;

/// Saga status values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SagaStatus {
    /// Row persisted, debit not yet attempted.
    Initiated,
    /// Source debit committed; credit pending.
    SourceDebited,
    /// Terminal: both legs committed.
    Completed,
    /// Credit failed; refund pending (or repeatedly failing).
    Compensating,
    /// Terminal: transfer did not happen (source refunded if it was
    /// debited).
    Failed,
}

impl SagaStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::SourceDebited => "SOURCE_DEBITED",
            Self::Completed => "COMPLETED",
            Self::Compensating => "COMPENSATING",
            Self::Failed => "FAILED",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(Self::Initiated),
            "SOURCE_DEBITED" => Some(Self::SourceDebited),
            "COMPLETED" => Some(Self::Completed),
            "COMPENSATING" => Some(Self::Compensating),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal (never rewritten).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistent transfer saga state.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferSaga {
    /// Unique saga id; ties the legs of one transfer together.
    pub saga_id: SagaId,
    /// Source wallet.
    pub from_wallet_id: WalletId,
    /// Destination wallet.
    pub to_wallet_id: WalletId,
    /// Transfer amount.
    pub amount: Money,
    /// Current status.
    pub status: SagaStatus,
    /// Transaction id of the committed debit leg.
    pub debit_tx_id: Option<Uuid>,
    /// Transaction id of the committed credit leg.
    pub credit_tx_id: Option<Uuid>,
    /// Transaction id of the committed refund leg.
    pub compensation_tx_id: Option<Uuid>,
    /// Last error observed by the orchestrator.
    pub error_message: Option<String>,
    /// When the saga was created.
    pub created_at: DateTime<Utc>,
    /// When the saga was last updated.
    pub updated_at: DateTime<Utc>,
}

impl TransferSaga {
    /// Create a fresh saga in `INITIATED`.
    #[must_use]
    pub fn new(
        saga_id: SagaId,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            saga_id,
            from_wallet_id,
            to_wallet_id,
            amount,
            status: SagaStatus::Initiated,
            debit_tx_id: None,
            credit_tx_id: None,
            compensation_tx_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Errors from the saga store.
#[derive(Error, Debug)]
pub enum SagaStoreError {
    /// Storage failure; retryable.
    #[error("Saga storage failure: {0}")]
    Storage(String),

    /// A transition was attempted from a state that does not allow it (a
    /// replay, a race, or a bug). The row was not changed.
    #[error("Invalid transition for saga {saga_id}: {attempted} not allowed from current state")]
    InvalidTransition {
        /// The saga.
        saga_id: SagaId,
        /// The transition that was refused.
        attempted: &'static str,
    },
}

/// Persistence for transfer sagas.
///
/// Only the saga's owner (the command that created it, or the recovery
/// scanner resuming it) writes a given row; transitions are status-guarded
/// so terminal states cannot be rewritten.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Persist a new saga in `INITIATED`.
    async fn insert(&self, saga: &TransferSaga) -> Result<(), SagaStoreError>;

    /// `INITIATED` → `SOURCE_DEBITED`, recording the debit transaction id.
    async fn mark_source_debited(
        &self,
        saga_id: SagaId,
        debit_tx_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError>;

    /// `SOURCE_DEBITED` → `COMPLETED`, recording the credit transaction id.
    async fn mark_completed(
        &self,
        saga_id: SagaId,
        credit_tx_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError>;

    /// `SOURCE_DEBITED` → `COMPENSATING`, recording the credit failure.
    async fn mark_compensating(
        &self,
        saga_id: SagaId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError>;

    /// `INITIATED` or `COMPENSATING` → `FAILED`, recording the refund
    /// transaction id when compensation ran.
    async fn mark_failed(
        &self,
        saga_id: SagaId,
        compensation_tx_id: Option<Uuid>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError>;

    /// Load a saga by id.
    async fn get(&self, saga_id: SagaId) -> Result<Option<TransferSaga>, SagaStoreError>;

    /// Sagas in the given non-terminal statuses not updated since
    /// `older_than`, oldest first. Feeds the recovery scanner.
    async fn list_stalled(
        &self,
        statuses: &[SagaStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferSaga>, SagaStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            SagaStatus::Initiated,
            SagaStatus::SourceDebited,
            SagaStatus::Completed,
            SagaStatus::Compensating,
            SagaStatus::Failed,
        ] {
            assert_eq!(SagaStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SagaStatus::parse("???"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(!SagaStatus::Initiated.is_terminal());
        assert!(!SagaStatus::SourceDebited.is_terminal());
        // COMPENSATING is terminal only from the automation's perspective
        // after the refund keeps failing; the scanner still retries it.
        assert!(!SagaStatus::Compensating.is_terminal());
    }
}
