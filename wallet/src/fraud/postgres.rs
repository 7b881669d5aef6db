//! `PostgreSQL` fraud store.
//!
//! Lives in its own database. The alert insert uses
//! `ON CONFLICT DO NOTHING` over `(transaction_id, rule_id)` and reports
//! whether a row landed — that bool is what keeps redelivered events from
//! double-counting risk.

use super::{Alert, FraudError, FraudStore, RecentEvent, RiskLevel, RiskProfile, Severity};
use crate::types::WalletId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use walletd_core::money::Money;

/// Run the fraud migrations on the fraud database.
///
/// # Errors
///
/// Returns [`FraudError::Storage`] if a migration fails.
pub async fn run_fraud_migrations(pool: &PgPool) -> Result<(), FraudError> {
    sqlx::migrate!("./migrations/fraud")
        .run(pool)
        .await
        .map_err(|e| FraudError::Storage(format!("Migration failed: {e}")))?;

    tracing::info!("Fraud migrations completed");
    Ok(())
}

/// `PostgreSQL`-backed fraud store.
#[derive(Clone)]
pub struct PostgresFraudStore {
    pool: PgPool,
}

impl PostgresFraudStore {
    /// Create the store on the fraud pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn money_from_row(cents: i64) -> Result<Money, FraudError> {
        u64::try_from(cents)
            .map(Money::from_cents)
            .map_err(|e| FraudError::Storage(format!("Invalid amount: {e}")))
    }

    fn row_to_profile(row: &sqlx::postgres::PgRow) -> Result<RiskProfile, FraudError> {
        let score: i32 = row.get("risk_score");
        let score = u8::try_from(score)
            .map_err(|e| FraudError::Storage(format!("Invalid risk score: {e}")))?;
        let level_str: String = row.get("risk_level");
        let risk_level = RiskLevel::parse(&level_str)
            .ok_or_else(|| FraudError::Storage(format!("Invalid risk level: {level_str}")))?;

        Ok(RiskProfile {
            wallet_id: WalletId::new(row.get::<String, _>("wallet_id")),
            risk_score: score,
            risk_level,
            alert_count: row.get("alert_count"),
            last_updated: row.get("last_updated"),
        })
    }
}

#[async_trait]
impl FraudStore for PostgresFraudStore {
    async fn record_event(&self, event: &RecentEvent) -> Result<(), FraudError> {
        let amount = i64::try_from(event.amount.cents())
            .map_err(|e| FraudError::Storage(format!("Amount overflow: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO fraud_recent_events
                (wallet_id, event_type, amount_cents, transaction_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(event.wallet_id.as_str())
        .bind(&event.event_type)
        .bind(amount)
        .bind(event.transaction_id)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| FraudError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn recent_for_wallet(
        &self,
        wallet_id: &WalletId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentEvent>, FraudError> {
        let rows = sqlx::query(
            r"
            SELECT wallet_id, event_type, amount_cents, transaction_id, created_at
            FROM fraud_recent_events
            WHERE wallet_id = $1 AND created_at >= $2
            ORDER BY created_at ASC
            ",
        )
        .bind(wallet_id.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FraudError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(RecentEvent {
                    wallet_id: WalletId::new(row.get::<String, _>("wallet_id")),
                    event_type: row.get("event_type"),
                    amount: Self::money_from_row(row.get("amount_cents"))?,
                    transaction_id: row.get("transaction_id"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<bool, FraudError> {
        let result = sqlx::query(
            r"
            INSERT INTO fraud_alerts
                (wallet_id, rule_id, rule_name, severity, transaction_id, event_type, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (transaction_id, rule_id) DO NOTHING
            ",
        )
        .bind(alert.wallet_id.as_str())
        .bind(&alert.rule_id)
        .bind(&alert.rule_name)
        .bind(alert.severity.as_str())
        .bind(alert.transaction_id)
        .bind(&alert.event_type)
        .bind(&alert.payload)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| FraudError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn raise_risk(
        &self,
        wallet_id: &WalletId,
        delta: u8,
        at: DateTime<Utc>,
    ) -> Result<RiskProfile, FraudError> {
        let initial_score = delta.min(100);
        let initial_level = RiskLevel::from_score(initial_score);

        let row = sqlx::query(
            r"
            INSERT INTO fraud_risk_profiles
                (wallet_id, risk_score, risk_level, alert_count, last_updated)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (wallet_id) DO UPDATE SET
                risk_score = LEAST(fraud_risk_profiles.risk_score + $5, 100),
                risk_level = CASE
                    WHEN LEAST(fraud_risk_profiles.risk_score + $5, 100) > 75 THEN 'CRITICAL'
                    WHEN LEAST(fraud_risk_profiles.risk_score + $5, 100) > 50 THEN 'HIGH'
                    WHEN LEAST(fraud_risk_profiles.risk_score + $5, 100) > 25 THEN 'MEDIUM'
                    ELSE 'LOW'
                END,
                alert_count = fraud_risk_profiles.alert_count + 1,
                last_updated = $4
            RETURNING wallet_id, risk_score, risk_level, alert_count, last_updated
            ",
        )
        .bind(wallet_id.as_str())
        .bind(i32::from(initial_score))
        .bind(initial_level.as_str())
        .bind(at)
        .bind(i32::from(delta))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FraudError::Storage(e.to_string()))?;

        Self::row_to_profile(&row)
    }

    async fn profile(&self, wallet_id: &WalletId) -> Result<Option<RiskProfile>, FraudError> {
        let row = sqlx::query(
            r"
            SELECT wallet_id, risk_score, risk_level, alert_count, last_updated
            FROM fraud_risk_profiles
            WHERE wallet_id = $1
            ",
        )
        .bind(wallet_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FraudError::Storage(e.to_string()))?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }

    async fn alerts_for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<Alert>, FraudError> {
        let rows = sqlx::query(
            r"
            SELECT wallet_id, rule_id, rule_name, severity, transaction_id,
                   event_type, payload, created_at
            FROM fraud_alerts
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(wallet_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FraudError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let severity_str: String = row.get("severity");
                let severity = match severity_str.as_str() {
                    "LOW" => Severity::Low,
                    "MEDIUM" => Severity::Medium,
                    "HIGH" => Severity::High,
                    "CRITICAL" => Severity::Critical,
                    other => {
                        return Err(FraudError::Storage(format!("Invalid severity: {other}")))
                    }
                };

                Ok(Alert {
                    wallet_id: WalletId::new(row.get::<String, _>("wallet_id")),
                    rule_id: row.get("rule_id"),
                    rule_name: row.get("rule_name"),
                    severity,
                    transaction_id: row.get("transaction_id"),
                    event_type: row.get("event_type"),
                    payload: row.get("payload"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, FraudError> {
        let result = sqlx::query("DELETE FROM fraud_recent_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| FraudError::Storage(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
