//! In-memory implementations of the app-level stores.
//!
//! Used by the integration suites (together with the in-memory event
//! store/bus from `walletd-testing`) so every scenario runs deterministic
//! and fast. The mocks keep the semantics that matter: the saga store
//! enforces one-way transitions, the idempotency store is atomic
//! check-and-lock, the transaction read model deduplicates on row id, and
//! the fraud store deduplicates alerts on `(transaction_id, rule_id)`.

use crate::fraud::{Alert, FraudError, FraudStore, RecentEvent, RiskLevel, RiskProfile};
use crate::idempotency::{CheckAndLock, IdempotencyError, IdempotencyStore};
use crate::projections::{
    ProjectionError, RecordOutcome, TransactionReadModel, TransactionRow, WalletReadModel,
    WalletView,
};
use crate::runtime::{DeadLetterSink, HandlerError};
use crate::saga::{SagaStatus, SagaStore, SagaStoreError, TransferSaga};
use crate::types::{SagaId, WalletId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;
use walletd_core::event_bus::Delivery;
use walletd_core::money::Money;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// In-memory saga store with transition enforcement.
#[derive(Default)]
pub struct InMemorySagaStore {
    sagas: Mutex<HashMap<Uuid, TransferSaga>>,
}

impl InMemorySagaStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All sagas, for assertions.
    #[must_use]
    pub fn all(&self) -> Vec<TransferSaga> {
        lock(&self.sagas).values().cloned().collect()
    }

    fn transition<F>(
        &self,
        saga_id: SagaId,
        allowed_from: &[SagaStatus],
        attempted: &'static str,
        update: F,
    ) -> Result<(), SagaStoreError>
    where
        F: FnOnce(&mut TransferSaga),
    {
        let mut sagas = lock(&self.sagas);
        let saga = sagas
            .get_mut(saga_id.as_uuid())
            .ok_or_else(|| SagaStoreError::Storage(format!("saga {saga_id} not found")))?;

        if !allowed_from.contains(&saga.status) {
            return Err(SagaStoreError::InvalidTransition { saga_id, attempted });
        }

        update(saga);
        Ok(())
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn insert(&self, saga: &TransferSaga) -> Result<(), SagaStoreError> {
        lock(&self.sagas).insert(*saga.saga_id.as_uuid(), saga.clone());
        Ok(())
    }

    async fn mark_source_debited(
        &self,
        saga_id: SagaId,
        debit_tx_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        self.transition(saga_id, &[SagaStatus::Initiated], "SOURCE_DEBITED", |saga| {
            saga.status = SagaStatus::SourceDebited;
            saga.debit_tx_id = Some(debit_tx_id);
            saga.updated_at = at;
        })
    }

    async fn mark_completed(
        &self,
        saga_id: SagaId,
        credit_tx_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        self.transition(saga_id, &[SagaStatus::SourceDebited], "COMPLETED", |saga| {
            saga.status = SagaStatus::Completed;
            saga.credit_tx_id = Some(credit_tx_id);
            saga.error_message = None;
            saga.updated_at = at;
        })
    }

    async fn mark_compensating(
        &self,
        saga_id: SagaId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        let error = error.to_string();
        self.transition(
            saga_id,
            &[SagaStatus::SourceDebited],
            "COMPENSATING",
            |saga| {
                saga.status = SagaStatus::Compensating;
                saga.error_message = Some(error);
                saga.updated_at = at;
            },
        )
    }

    async fn mark_failed(
        &self,
        saga_id: SagaId,
        compensation_tx_id: Option<Uuid>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        let error = error.map(ToOwned::to_owned);
        self.transition(
            saga_id,
            &[SagaStatus::Initiated, SagaStatus::Compensating],
            "FAILED",
            |saga| {
                saga.status = SagaStatus::Failed;
                if compensation_tx_id.is_some() {
                    saga.compensation_tx_id = compensation_tx_id;
                }
                if error.is_some() {
                    saga.error_message = error;
                }
                saga.updated_at = at;
            },
        )
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<TransferSaga>, SagaStoreError> {
        Ok(lock(&self.sagas).get(saga_id.as_uuid()).cloned())
    }

    async fn list_stalled(
        &self,
        statuses: &[SagaStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferSaga>, SagaStoreError> {
        let mut stalled: Vec<TransferSaga> = lock(&self.sagas)
            .values()
            .filter(|saga| statuses.contains(&saga.status) && saga.updated_at < older_than)
            .cloned()
            .collect();
        stalled.sort_by_key(|saga| saga.updated_at);
        stalled.truncate(limit);
        Ok(stalled)
    }
}

/// In-memory idempotency store (no TTL expiry; tests are short).
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, Option<serde_json::Value>>>,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn check_and_lock(&self, key: &str) -> Result<CheckAndLock, IdempotencyError> {
        let mut records = lock(&self.records);
        match records.get(key) {
            None => {
                records.insert(key.to_string(), None);
                Ok(CheckAndLock::NewLock)
            }
            Some(None) => Ok(CheckAndLock::InProgress),
            Some(Some(response)) => Ok(CheckAndLock::Completed(response.clone())),
        }
    }

    async fn complete(
        &self,
        key: &str,
        response: &serde_json::Value,
    ) -> Result<(), IdempotencyError> {
        lock(&self.records).insert(key.to_string(), Some(response.clone()));
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        lock(&self.records).remove(key);
        Ok(())
    }
}

/// In-memory wallet projection.
#[derive(Default)]
pub struct InMemoryWalletReadModel {
    wallets: Mutex<HashMap<String, WalletView>>,
}

impl InMemoryWalletReadModel {
    /// Create an empty read model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek at a projected balance, for polling assertions.
    #[must_use]
    pub fn balance_of(&self, wallet_id: &WalletId) -> Option<Money> {
        lock(&self.wallets)
            .get(wallet_id.as_str())
            .map(|view| view.balance)
    }
}

#[async_trait]
impl WalletReadModel for InMemoryWalletReadModel {
    async fn upsert_balance(
        &self,
        wallet_id: &WalletId,
        balance: Money,
        at: DateTime<Utc>,
    ) -> Result<(), ProjectionError> {
        let mut wallets = lock(&self.wallets);
        wallets
            .entry(wallet_id.as_str().to_string())
            .and_modify(|view| {
                view.balance = balance;
                view.updated_at = at;
            })
            .or_insert_with(|| WalletView {
                id: wallet_id.clone(),
                balance,
                created_at: at,
                updated_at: at,
            });
        Ok(())
    }

    async fn get(&self, wallet_id: &WalletId) -> Result<Option<WalletView>, ProjectionError> {
        Ok(lock(&self.wallets).get(wallet_id.as_str()).cloned())
    }
}

/// In-memory transaction projection with primary-key dedup.
#[derive(Default)]
pub struct InMemoryTransactionReadModel {
    rows: Mutex<HashMap<String, TransactionRow>>,
}

impl InMemoryTransactionReadModel {
    /// Create an empty read model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, for assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    /// Whether the projection holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TransactionReadModel for InMemoryTransactionReadModel {
    async fn record(&self, row: &TransactionRow) -> Result<RecordOutcome, ProjectionError> {
        let mut rows = lock(&self.rows);
        if rows.contains_key(&row.id) {
            Ok(RecordOutcome::AlreadyApplied)
        } else {
            rows.insert(row.id.clone(), row.clone());
            Ok(RecordOutcome::Applied)
        }
    }

    async fn list_for_wallet(
        &self,
        wallet_id: &WalletId,
    ) -> Result<Vec<TransactionRow>, ProjectionError> {
        let mut rows: Vec<TransactionRow> = lock(&self.rows)
            .values()
            .filter(|row| &row.wallet_id == wallet_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        Ok(rows)
    }
}

/// In-memory fraud store with alert dedup and clamped risk scores.
#[derive(Default)]
pub struct InMemoryFraudStore {
    events: Mutex<Vec<RecentEvent>>,
    alerts: Mutex<Vec<Alert>>,
    profiles: Mutex<HashMap<String, RiskProfile>>,
}

impl InMemoryFraudStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FraudStore for InMemoryFraudStore {
    async fn record_event(&self, event: &RecentEvent) -> Result<(), FraudError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }

    async fn recent_for_wallet(
        &self,
        wallet_id: &WalletId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentEvent>, FraudError> {
        let mut events: Vec<RecentEvent> = lock(&self.events)
            .iter()
            .filter(|event| &event.wallet_id == wallet_id && event.created_at >= since)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.created_at);
        Ok(events)
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<bool, FraudError> {
        let mut alerts = lock(&self.alerts);
        let duplicate = alerts
            .iter()
            .any(|a| a.transaction_id == alert.transaction_id && a.rule_id == alert.rule_id);
        if duplicate {
            return Ok(false);
        }
        alerts.push(alert.clone());
        Ok(true)
    }

    async fn raise_risk(
        &self,
        wallet_id: &WalletId,
        delta: u8,
        at: DateTime<Utc>,
    ) -> Result<RiskProfile, FraudError> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles
            .entry(wallet_id.as_str().to_string())
            .and_modify(|profile| {
                profile.risk_score = profile.risk_score.saturating_add(delta).min(100);
                profile.risk_level = RiskLevel::from_score(profile.risk_score);
                profile.alert_count += 1;
                profile.last_updated = at;
            })
            .or_insert_with(|| {
                let score = delta.min(100);
                RiskProfile {
                    wallet_id: wallet_id.clone(),
                    risk_score: score,
                    risk_level: RiskLevel::from_score(score),
                    alert_count: 1,
                    last_updated: at,
                }
            });
        Ok(profile.clone())
    }

    async fn profile(&self, wallet_id: &WalletId) -> Result<Option<RiskProfile>, FraudError> {
        Ok(lock(&self.profiles).get(wallet_id.as_str()).cloned())
    }

    async fn alerts_for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<Alert>, FraudError> {
        let mut alerts: Vec<Alert> = lock(&self.alerts)
            .iter()
            .filter(|alert| &alert.wallet_id == wallet_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, FraudError> {
        let mut events = lock(&self.events);
        let before = events.len();
        events.retain(|event| event.created_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

/// In-memory dead-letter sink that records parked deliveries.
#[derive(Default)]
pub struct InMemoryDeadLetters {
    entries: Mutex<Vec<(String, Delivery, String)>>,
}

impl InMemoryDeadLetters {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(consumer, delivery, error)` parked so far.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Delivery, String)> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn record(
        &self,
        consumer: &str,
        delivery: &Delivery,
        error: &HandlerError,
    ) -> Result<(), String> {
        lock(&self.entries).push((consumer.to_string(), delivery.clone(), error.to_string()));
        Ok(())
    }
}
