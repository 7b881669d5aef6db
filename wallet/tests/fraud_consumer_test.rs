//! Fraud consumer tests: rule evaluation over the stream, alert dedup and
//! monotonic risk scoring (scenario S6).

use std::sync::Arc;
use walletd::events::{DepositKind, WalletEvent, WithdrawalKind};
use walletd::fraud::{FraudHandler, FraudStore, RiskLevel, Severity};
use walletd::mocks::InMemoryFraudStore;
use walletd::runtime::EventHandler;
use walletd::types::{SagaId, WalletId};
use walletd_core::event_bus::Delivery;
use walletd_core::money::Money;
use walletd_testing::FixedClock;

fn delivery(event: &WalletEvent, offset: i64) -> Delivery {
    Delivery {
        topic: event.routing_key().to_string(),
        partition: 0,
        offset,
        envelope: event
            .to_envelope(event.timestamp())
            .expect("envelope"),
    }
}

fn fixture() -> (Arc<InMemoryFraudStore>, FraudHandler) {
    let store = Arc::new(InMemoryFraudStore::new());
    let handler = FraudHandler::new(store.clone(), Arc::new(FixedClock::default_test_time()));
    (store, handler)
}

fn deposited_at(
    wallet: &str,
    cents: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> WalletEvent {
    WalletEvent::MoneyDeposited {
        wallet_id: WalletId::new(wallet),
        amount: Money::from_cents(cents),
        balance_after: Money::from_cents(cents),
        kind: DepositKind::Deposit,
        saga_id: None,
        counterparty: None,
        transaction_id: uuid::Uuid::new_v4(),
        timestamp,
    }
}

#[tokio::test]
async fn s6_large_deposit_raises_exactly_one_high_alert() {
    let (store, handler) = fixture();
    let wf = WalletId::new("wF");
    let now = FixedClock::default_test_time();
    use walletd_core::environment::Clock;

    // 15 000.00 — above the 10 000.00 threshold.
    let event = deposited_at("wF", 1_500_000, now.now());
    handler.handle(&delivery(&event, 0)).await.expect("handle");

    let alerts = store.alerts_for_wallet(&wf).await.expect("alerts");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "large-transaction");
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].transaction_id, event.transaction_id());

    let profile = store.profile(&wf).await.expect("profile").expect("profile");
    assert!(profile.risk_score >= 30);
    assert_eq!(profile.risk_level, RiskLevel::Medium);

    // Duplicate delivery: no second alert, no extra score.
    handler.handle(&delivery(&event, 0)).await.expect("replay");

    assert_eq!(store.alerts_for_wallet(&wf).await.expect("alerts").len(), 1);
    let replayed = store.profile(&wf).await.expect("profile").expect("profile");
    assert_eq!(replayed.risk_score, profile.risk_score);
    assert_eq!(replayed.alert_count, profile.alert_count);
}

#[tokio::test]
async fn more_than_five_events_in_ten_minutes_is_high_velocity() {
    let (store, handler) = fixture();
    let wf = WalletId::new("wF");
    use walletd_core::environment::Clock;
    let now = FixedClock::default_test_time().now();

    for i in 0..6 {
        let event = deposited_at("wF", 1_000, now - chrono::Duration::minutes(i));
        handler
            .handle(&delivery(&event, i))
            .await
            .expect("handle");
    }

    let alerts = store.alerts_for_wallet(&wf).await.expect("alerts");
    let velocity: Vec<_> = alerts
        .iter()
        .filter(|alert| alert.rule_id == "high-velocity")
        .collect();
    assert_eq!(velocity.len(), 1, "velocity fires once, on the sixth event");
    assert_eq!(velocity[0].severity, Severity::Medium);
}

#[tokio::test]
async fn withdrawal_shortly_after_deposit_is_rapid_withdrawal() {
    let (store, handler) = fixture();
    let wf = WalletId::new("wF");
    use walletd_core::environment::Clock;
    let now = FixedClock::default_test_time().now();

    let deposit = deposited_at("wF", 50_000, now - chrono::Duration::minutes(3));
    handler.handle(&delivery(&deposit, 0)).await.expect("deposit");

    let withdrawal = WalletEvent::MoneyWithdrawn {
        wallet_id: wf.clone(),
        amount: Money::from_cents(50_000),
        balance_after: Money::ZERO,
        kind: WithdrawalKind::Withdrawal,
        saga_id: None,
        counterparty: None,
        transaction_id: uuid::Uuid::new_v4(),
        timestamp: now,
    };
    handler
        .handle(&delivery(&withdrawal, 1))
        .await
        .expect("withdrawal");

    let alerts = store.alerts_for_wallet(&wf).await.expect("alerts");
    assert!(alerts.iter().any(|alert| alert.rule_id == "rapid-withdrawal"
        && alert.severity == Severity::High
        && alert.transaction_id == withdrawal.transaction_id()));
}

#[tokio::test]
async fn a_transfer_scores_each_wallet_exactly_once() {
    let (store, handler) = fixture();
    let wa = WalletId::new("wA");
    let wb = WalletId::new("wB");
    use walletd_core::environment::Clock;
    let now = FixedClock::default_test_time().now();

    // The full sequence one completed transfer puts on the money topics:
    // the debit leg, the credit leg, and the summary (which carries its own
    // fresh transaction id, so alert dedup alone cannot absorb it).
    let saga_id = SagaId::new();
    let debit = WalletEvent::MoneyWithdrawn {
        wallet_id: wa.clone(),
        amount: Money::from_cents(2_000_000),
        balance_after: Money::ZERO,
        kind: WithdrawalKind::TransferOut,
        saga_id: Some(saga_id),
        counterparty: Some(wb.clone()),
        transaction_id: uuid::Uuid::new_v4(),
        timestamp: now,
    };
    let credit = WalletEvent::MoneyDeposited {
        wallet_id: wb.clone(),
        amount: Money::from_cents(2_000_000),
        balance_after: Money::from_cents(2_000_000),
        kind: DepositKind::TransferIn,
        saga_id: Some(saga_id),
        counterparty: Some(wa.clone()),
        transaction_id: uuid::Uuid::new_v4(),
        timestamp: now,
    };
    let summary = WalletEvent::MoneyTransferred {
        saga_id,
        from_wallet_id: wa.clone(),
        to_wallet_id: wb.clone(),
        amount: Money::from_cents(2_000_000),
        debit_transaction_id: debit.transaction_id(),
        credit_transaction_id: credit.transaction_id(),
        transaction_id: uuid::Uuid::new_v4(),
        timestamp: now,
    };

    handler.handle(&delivery(&debit, 0)).await.expect("debit");
    handler.handle(&delivery(&credit, 1)).await.expect("credit");
    handler.handle(&delivery(&summary, 2)).await.expect("summary");

    // One large-transaction alert per wallet, scored once: the summary must
    // not add a second alert or another +30 against the source.
    let source_alerts = store.alerts_for_wallet(&wa).await.expect("alerts");
    assert_eq!(source_alerts.len(), 1);
    assert_eq!(source_alerts[0].rule_id, "large-transaction");
    assert_eq!(source_alerts[0].transaction_id, debit.transaction_id());

    let source = store.profile(&wa).await.expect("profile").expect("profile");
    assert_eq!(source.risk_score, 30);
    assert_eq!(source.alert_count, 1);

    let dest_alerts = store.alerts_for_wallet(&wb).await.expect("alerts");
    assert_eq!(dest_alerts.len(), 1);
    assert_eq!(dest_alerts[0].transaction_id, credit.transaction_id());

    let dest = store.profile(&wb).await.expect("profile").expect("profile");
    assert_eq!(dest.risk_score, 30);
    assert_eq!(dest.alert_count, 1);
}

#[tokio::test]
async fn risk_score_is_clamped_at_one_hundred() {
    let (store, handler) = fixture();
    let wf = WalletId::new("wF");
    use walletd_core::environment::Clock;
    let now = FixedClock::default_test_time().now();

    // Four separate large transactions: 4 × 30 would be 120.
    for i in 0..4 {
        let event = deposited_at("wF", 2_000_000, now - chrono::Duration::seconds(i));
        handler.handle(&delivery(&event, i)).await.expect("handle");
    }

    let profile = store.profile(&wf).await.expect("profile").expect("profile");
    assert_eq!(profile.risk_score, 100);
    assert_eq!(profile.risk_level, RiskLevel::Critical);
    assert!(profile.alert_count >= 4);
}

#[tokio::test]
async fn lifecycle_events_are_ignored() {
    let (store, handler) = fixture();
    use walletd_core::environment::Clock;
    let now = FixedClock::default_test_time().now();

    let event = WalletEvent::TransferInitiated {
        saga_id: SagaId::new(),
        from_wallet_id: WalletId::new("wA"),
        to_wallet_id: WalletId::new("wB"),
        amount: Money::from_cents(2_000_000),
        transaction_id: uuid::Uuid::new_v4(),
        timestamp: now,
    };
    handler.handle(&delivery(&event, 0)).await.expect("handle");

    assert!(store
        .alerts_for_wallet(&WalletId::new("wA"))
        .await
        .expect("alerts")
        .is_empty());
}
