//! Read models: the query side of CQRS.
//!
//! The projection consumer folds the wallet event stream into two
//! denormalized tables:
//!
//! - **wallet projection** `{id, balance, created_at, updated_at}` — the
//!   balance is SET from each event's `balance_after` (never incremented),
//!   so a duplicate delivery re-applies the same value and replay
//!   converges.
//! - **transaction projection** — one row per ledger entry, keyed by the
//!   event's transaction id (suffixed `-in`/`-out` for transfer legs). The
//!   primary key is the idempotency mechanism: a conflict means the event
//!   was already applied, and the consumer acks.
//!
//! Projections are eventually consistent and rebuildable; the event log
//! remains the source of truth.

pub mod handler;
pub mod postgres;

pub use handler::ProjectionHandler;
pub use postgres::{PostgresTransactionReadModel, PostgresWalletReadModel};

use crate::types::{TransactionKind, WalletId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use walletd_core::money::Money;

/// Errors from projection storage.
#[derive(Error, Debug)]
pub enum ProjectionError {
    /// Storage backend error.
    #[error("Projection storage error: {0}")]
    Storage(String),
}

/// A row of the wallet projection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    /// The wallet id.
    pub id: WalletId,
    /// Last projected balance.
    pub balance: Money,
    /// When the wallet was first seen.
    pub created_at: DateTime<Utc>,
    /// When the wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A row of the transaction projection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    /// Row id: the transaction id, with `-in`/`-out` suffix for transfer
    /// legs.
    pub id: String,
    /// The wallet this entry belongs to.
    pub wallet_id: WalletId,
    /// Entry type.
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Entry amount.
    pub amount: Money,
    /// Wallet balance after the entry.
    pub balance_after: Money,
    /// The other wallet of a transfer, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_wallet_id: Option<WalletId>,
    /// When the underlying event occurred.
    pub timestamp: DateTime<Utc>,
}

/// Whether a projection write changed anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The row was inserted.
    Applied,
    /// The row already existed — a replayed delivery; a no-op.
    AlreadyApplied,
}

/// The wallet projection (balance per wallet).
#[async_trait]
pub trait WalletReadModel: Send + Sync {
    /// Upsert a wallet's balance. SET semantics: `balance` is the event's
    /// authoritative `balance_after`.
    async fn upsert_balance(
        &self,
        wallet_id: &WalletId,
        balance: Money,
        at: DateTime<Utc>,
    ) -> Result<(), ProjectionError>;

    /// Fetch a wallet's projected view.
    async fn get(&self, wallet_id: &WalletId) -> Result<Option<WalletView>, ProjectionError>;
}

/// The transaction projection (history per wallet).
#[async_trait]
pub trait TransactionReadModel: Send + Sync {
    /// Insert a transaction row; a primary-key conflict reports
    /// [`RecordOutcome::AlreadyApplied`].
    async fn record(&self, row: &TransactionRow) -> Result<RecordOutcome, ProjectionError>;

    /// All rows for a wallet, newest first.
    async fn list_for_wallet(
        &self,
        wallet_id: &WalletId,
    ) -> Result<Vec<TransactionRow>, ProjectionError>;
}
