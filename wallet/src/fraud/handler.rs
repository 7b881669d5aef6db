//! The fraud consumer's event handler.

use super::rules::{self, high_velocity_window};
use super::{Alert, FraudError, FraudStore, RecentEvent};
use crate::events::WalletEvent;
use crate::runtime::{EventHandler, HandlerError};
use crate::types::WalletId;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;
use walletd_core::environment::Clock;
use walletd_core::event_bus::Delivery;
use walletd_core::money::Money;

impl From<FraudError> for HandlerError {
    fn from(e: FraudError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Evaluates fraud rules over the transactional wallet topics.
pub struct FraudHandler {
    store: Arc<dyn FraudStore>,
    clock: Arc<dyn Clock>,
}

impl FraudHandler {
    /// Consumer name used for the durable group and dead letters.
    pub const NAME: &'static str = "fraud";

    /// Create a handler over the fraud store.
    #[must_use]
    pub fn new(store: Arc<dyn FraudStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The wallet and amount a transactional event concerns, if any.
    ///
    /// Only the per-leg ledger events count: a transfer already produces a
    /// `MoneyWithdrawn` for the source and a `MoneyDeposited` for the
    /// destination, so the `MoneyTransferred` summary is ignored here —
    /// evaluating it too would score the same economic event twice against
    /// the source wallet (the summary carries its own transaction id, so
    /// the `(transaction_id, rule_id)` alert dedup cannot catch the
    /// overlap).
    fn transactional_view(event: &WalletEvent) -> Option<(WalletId, Money, Uuid)> {
        match event {
            WalletEvent::MoneyDeposited {
                wallet_id,
                amount,
                transaction_id,
                ..
            }
            | WalletEvent::MoneyWithdrawn {
                wallet_id,
                amount,
                transaction_id,
                ..
            } => Some((wallet_id.clone(), *amount, *transaction_id)),
            _ => None,
        }
    }
}

#[async_trait]
impl EventHandler for FraudHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let event = WalletEvent::from_envelope(&delivery.envelope)
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;

        let Some((wallet_id, amount, transaction_id)) = Self::transactional_view(&event) else {
            return Ok(());
        };

        let now = self.clock.now();
        let recent = RecentEvent {
            wallet_id: wallet_id.clone(),
            event_type: event.event_type().to_string(),
            amount,
            transaction_id,
            created_at: event.timestamp(),
        };
        self.store.record_event(&recent).await?;

        let window = self
            .store
            .recent_for_wallet(&wallet_id, now - high_velocity_window())
            .await?;

        for hit in rules::evaluate(&recent, &window, now) {
            let alert = Alert {
                wallet_id: wallet_id.clone(),
                rule_id: hit.rule_id.to_string(),
                rule_name: hit.rule_name.to_string(),
                severity: hit.severity,
                transaction_id,
                event_type: event.event_type().to_string(),
                payload: delivery.envelope.data.clone(),
                created_at: now,
            };

            if self.store.insert_alert(&alert).await? {
                let profile = self
                    .store
                    .raise_risk(&wallet_id, hit.severity.score_delta(), now)
                    .await?;

                tracing::warn!(
                    wallet_id = %wallet_id,
                    rule_id = hit.rule_id,
                    severity = hit.severity.as_str(),
                    risk_score = profile.risk_score,
                    risk_level = profile.risk_level.as_str(),
                    "Fraud alert raised"
                );
                metrics::counter!("fraud.alerts", "rule" => hit.rule_id).increment(1);
            } else {
                // Redelivered event: the alert exists, risk stays put.
                tracing::debug!(
                    wallet_id = %wallet_id,
                    rule_id = hit.rule_id,
                    transaction_id = %transaction_id,
                    "Duplicate fraud alert suppressed"
                );
            }
        }

        // Opportunistic window pruning; losing the race is harmless.
        if let Err(e) = self.store.prune_before(now - high_velocity_window()).await {
            tracing::warn!(error = %e, "Failed to prune fraud window");
        }

        Ok(())
    }
}
