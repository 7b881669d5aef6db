//! `PostgreSQL` saga store.
//!
//! Lives in the write-side database next to the event log. Every transition
//! is a status-guarded `UPDATE … WHERE status = $expected`; zero affected
//! rows means the transition was not legal from the row's current state and
//! surfaces as [`SagaStoreError::InvalidTransition`].

use super::{SagaStatus, SagaStore, SagaStoreError, TransferSaga};
use crate::types::{SagaId, WalletId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;
use walletd_core::money::Money;

/// `PostgreSQL`-backed saga store.
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Create a saga store on the write-side pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_saga(row: &sqlx::postgres::PgRow) -> Result<TransferSaga, SagaStoreError> {
        let status_str: String = row.get("status");
        let status = SagaStatus::parse(&status_str)
            .ok_or_else(|| SagaStoreError::Storage(format!("Invalid saga status: {status_str}")))?;

        let amount_cents: i64 = row.get("amount_cents");
        let amount_cents = u64::try_from(amount_cents)
            .map_err(|e| SagaStoreError::Storage(format!("Invalid amount: {e}")))?;

        Ok(TransferSaga {
            saga_id: SagaId::from_uuid(row.get("saga_id")),
            from_wallet_id: WalletId::new(row.get::<String, _>("from_wallet_id")),
            to_wallet_id: WalletId::new(row.get::<String, _>("to_wallet_id")),
            amount: Money::from_cents(amount_cents),
            status,
            debit_tx_id: row.get("debit_tx_id"),
            credit_tx_id: row.get("credit_tx_id"),
            compensation_tx_id: row.get("compensation_tx_id"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn guarded_transition(
        &self,
        result: Result<sqlx::postgres::PgQueryResult, sqlx::Error>,
        saga_id: SagaId,
        attempted: &'static str,
    ) -> Result<(), SagaStoreError> {
        let result = result.map_err(|e| SagaStoreError::Storage(e.to_string()))?;
        if result.rows_affected() == 0 {
            tracing::warn!(saga_id = %saga_id, attempted = attempted, "Saga transition refused");
            return Err(SagaStoreError::InvalidTransition { saga_id, attempted });
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn insert(&self, saga: &TransferSaga) -> Result<(), SagaStoreError> {
        let amount = i64::try_from(saga.amount.cents())
            .map_err(|e| SagaStoreError::Storage(format!("Amount overflow: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO transfer_sagas
                (saga_id, from_wallet_id, to_wallet_id, amount_cents, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ",
        )
        .bind(saga.saga_id.as_uuid())
        .bind(saga.from_wallet_id.as_str())
        .bind(saga.to_wallet_id.as_str())
        .bind(amount)
        .bind(saga.status.as_str())
        .bind(saga.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SagaStoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn mark_source_debited(
        &self,
        saga_id: SagaId,
        debit_tx_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        let result = sqlx::query(
            r"
            UPDATE transfer_sagas
            SET status = 'SOURCE_DEBITED', debit_tx_id = $1, updated_at = $2
            WHERE saga_id = $3 AND status = 'INITIATED'
            ",
        )
        .bind(debit_tx_id)
        .bind(at)
        .bind(saga_id.as_uuid())
        .execute(&self.pool)
        .await;

        self.guarded_transition(result, saga_id, "SOURCE_DEBITED").await
    }

    async fn mark_completed(
        &self,
        saga_id: SagaId,
        credit_tx_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        let result = sqlx::query(
            r"
            UPDATE transfer_sagas
            SET status = 'COMPLETED', credit_tx_id = $1, error_message = NULL, updated_at = $2
            WHERE saga_id = $3 AND status = 'SOURCE_DEBITED'
            ",
        )
        .bind(credit_tx_id)
        .bind(at)
        .bind(saga_id.as_uuid())
        .execute(&self.pool)
        .await;

        self.guarded_transition(result, saga_id, "COMPLETED").await
    }

    async fn mark_compensating(
        &self,
        saga_id: SagaId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        let result = sqlx::query(
            r"
            UPDATE transfer_sagas
            SET status = 'COMPENSATING', error_message = $1, updated_at = $2
            WHERE saga_id = $3 AND status = 'SOURCE_DEBITED'
            ",
        )
        .bind(error)
        .bind(at)
        .bind(saga_id.as_uuid())
        .execute(&self.pool)
        .await;

        self.guarded_transition(result, saga_id, "COMPENSATING").await
    }

    async fn mark_failed(
        &self,
        saga_id: SagaId,
        compensation_tx_id: Option<Uuid>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        let result = sqlx::query(
            r"
            UPDATE transfer_sagas
            SET status = 'FAILED',
                compensation_tx_id = COALESCE($1, compensation_tx_id),
                error_message = COALESCE($2, error_message),
                updated_at = $3
            WHERE saga_id = $4 AND status IN ('INITIATED', 'COMPENSATING')
            ",
        )
        .bind(compensation_tx_id)
        .bind(error)
        .bind(at)
        .bind(saga_id.as_uuid())
        .execute(&self.pool)
        .await;

        self.guarded_transition(result, saga_id, "FAILED").await
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<TransferSaga>, SagaStoreError> {
        let row = sqlx::query(
            r"
            SELECT saga_id, from_wallet_id, to_wallet_id, amount_cents, status,
                   debit_tx_id, credit_tx_id, compensation_tx_id, error_message,
                   created_at, updated_at
            FROM transfer_sagas
            WHERE saga_id = $1
            ",
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SagaStoreError::Storage(e.to_string()))?;

        row.as_ref().map(Self::row_to_saga).transpose()
    }

    async fn list_stalled(
        &self,
        statuses: &[SagaStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferSaga>, SagaStoreError> {
        let status_strings: Vec<String> = statuses
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();

        #[allow(clippy::cast_possible_wrap)] // Limit is a small bounded value
        let rows = sqlx::query(
            r"
            SELECT saga_id, from_wallet_id, to_wallet_id, amount_cents, status,
                   debit_tx_id, credit_tx_id, compensation_tx_id, error_message,
                   created_at, updated_at
            FROM transfer_sagas
            WHERE status = ANY($1) AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            ",
        )
        .bind(&status_strings)
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SagaStoreError::Storage(e.to_string()))?;

        rows.iter().map(Self::row_to_saga).collect()
    }
}
