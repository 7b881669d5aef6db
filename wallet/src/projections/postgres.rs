//! `PostgreSQL` read-model stores.
//!
//! Live in their own database (true CQRS): the write side appends events,
//! the projection consumer writes here, queries read here.

use super::{
    ProjectionError, RecordOutcome, TransactionReadModel, TransactionRow, WalletReadModel,
    WalletView,
};
use crate::types::{TransactionKind, WalletId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use walletd_core::money::Money;

/// Run the read-model migrations on the projection database.
///
/// # Errors
///
/// Returns [`ProjectionError::Storage`] if a migration fails.
pub async fn run_projection_migrations(pool: &PgPool) -> Result<(), ProjectionError> {
    sqlx::migrate!("./migrations/projections")
        .run(pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;

    tracing::info!("Projection migrations completed");
    Ok(())
}

/// Postgres wallet projection.
#[derive(Clone)]
pub struct PostgresWalletReadModel {
    pool: PgPool,
}

impl PostgresWalletReadModel {
    /// Create the store on the projection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool (for health checks).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WalletReadModel for PostgresWalletReadModel {
    async fn upsert_balance(
        &self,
        wallet_id: &WalletId,
        balance: Money,
        at: DateTime<Utc>,
    ) -> Result<(), ProjectionError> {
        let cents = i64::try_from(balance.cents())
            .map_err(|e| ProjectionError::Storage(format!("Balance overflow: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO wallets (id, balance_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (id) DO UPDATE
            SET balance_cents = EXCLUDED.balance_cents,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(wallet_id.as_str())
        .bind(cents)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, wallet_id: &WalletId) -> Result<Option<WalletView>, ProjectionError> {
        let row = sqlx::query(
            "SELECT id, balance_cents, created_at, updated_at FROM wallets WHERE id = $1",
        )
        .bind(wallet_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        row.map(|row| {
            let cents: i64 = row.get("balance_cents");
            let cents = u64::try_from(cents)
                .map_err(|e| ProjectionError::Storage(format!("Invalid balance: {e}")))?;

            Ok(WalletView {
                id: WalletId::new(row.get::<String, _>("id")),
                balance: Money::from_cents(cents),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
        })
        .transpose()
    }
}

/// Postgres transaction projection.
#[derive(Clone)]
pub struct PostgresTransactionReadModel {
    pool: PgPool,
}

impl PostgresTransactionReadModel {
    /// Create the store on the projection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<TransactionRow, ProjectionError> {
        let kind_str: String = row.get("kind");
        let kind = TransactionKind::parse(&kind_str).ok_or_else(|| {
            ProjectionError::Storage(format!("Invalid transaction kind: {kind_str}"))
        })?;

        let amount: i64 = row.get("amount_cents");
        let balance_after: i64 = row.get("balance_after_cents");
        let to_money = |cents: i64| {
            u64::try_from(cents)
                .map(Money::from_cents)
                .map_err(|e| ProjectionError::Storage(format!("Invalid amount: {e}")))
        };

        Ok(TransactionRow {
            id: row.get("id"),
            wallet_id: WalletId::new(row.get::<String, _>("wallet_id")),
            kind,
            amount: to_money(amount)?,
            balance_after: to_money(balance_after)?,
            related_wallet_id: row
                .get::<Option<String>, _>("related_wallet_id")
                .map(WalletId::new),
            timestamp: row.get("occurred_at"),
        })
    }
}

#[async_trait]
impl TransactionReadModel for PostgresTransactionReadModel {
    async fn record(&self, row: &TransactionRow) -> Result<RecordOutcome, ProjectionError> {
        let amount = i64::try_from(row.amount.cents())
            .map_err(|e| ProjectionError::Storage(format!("Amount overflow: {e}")))?;
        let balance_after = i64::try_from(row.balance_after.cents())
            .map_err(|e| ProjectionError::Storage(format!("Balance overflow: {e}")))?;

        let result = sqlx::query(
            r"
            INSERT INTO transactions
                (id, wallet_id, kind, amount_cents, balance_after_cents, related_wallet_id, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(&row.id)
        .bind(row.wallet_id.as_str())
        .bind(row.kind.as_str())
        .bind(amount)
        .bind(balance_after)
        .bind(row.related_wallet_id.as_ref().map(WalletId::as_str))
        .bind(row.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            Ok(RecordOutcome::AlreadyApplied)
        } else {
            Ok(RecordOutcome::Applied)
        }
    }

    async fn list_for_wallet(
        &self,
        wallet_id: &WalletId,
    ) -> Result<Vec<TransactionRow>, ProjectionError> {
        let rows = sqlx::query(
            r"
            SELECT id, wallet_id, kind, amount_cents, balance_after_cents,
                   related_wallet_id, occurred_at
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY occurred_at DESC, id ASC
            ",
        )
        .bind(wallet_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        rows.iter().map(Self::row_to_transaction).collect()
    }
}
