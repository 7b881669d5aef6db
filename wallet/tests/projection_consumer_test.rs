//! Projection consumer tests: read-model updates, replay idempotency,
//! transfer row pairing, and the consumer loop's dead-lettering.

mod support;

use std::sync::Arc;
use support::eventually;
use walletd::events::{DepositKind, WalletEvent, WithdrawalKind};
use walletd::mocks::{InMemoryDeadLetters, InMemoryTransactionReadModel, InMemoryWalletReadModel};
use walletd::projections::{ProjectionHandler, TransactionReadModel, WalletReadModel};
use walletd::runtime::{EventConsumer, EventHandler};
use walletd::types::{SagaId, TransactionKind, WalletId};
use walletd_core::event_bus::{Delivery, EventBus, Subscription};
use walletd_core::money::Money;
use walletd_testing::InMemoryEventBus;

struct Fixture {
    wallets: Arc<InMemoryWalletReadModel>,
    transactions: Arc<InMemoryTransactionReadModel>,
    handler: ProjectionHandler,
}

fn fixture() -> Fixture {
    let wallets = Arc::new(InMemoryWalletReadModel::new());
    let transactions = Arc::new(InMemoryTransactionReadModel::new());
    let handler = ProjectionHandler::new(wallets.clone(), transactions.clone());
    Fixture {
        wallets,
        transactions,
        handler,
    }
}

fn delivery(event: &WalletEvent, offset: i64) -> Delivery {
    Delivery {
        topic: event.routing_key().to_string(),
        partition: 0,
        offset,
        envelope: event.to_envelope(chrono::Utc::now()).expect("envelope"),
    }
}

fn deposited(wallet: &str, cents: u64, balance_after: u64) -> WalletEvent {
    WalletEvent::MoneyDeposited {
        wallet_id: WalletId::new(wallet),
        amount: Money::from_cents(cents),
        balance_after: Money::from_cents(balance_after),
        kind: DepositKind::Deposit,
        saga_id: None,
        counterparty: None,
        transaction_id: uuid::Uuid::new_v4(),
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn deposit_event_upserts_wallet_and_records_transaction() {
    let fx = fixture();
    let event = deposited("w1", 10_000, 10_000);

    fx.handler.handle(&delivery(&event, 0)).await.expect("handle");

    let view = fx
        .wallets
        .get(&WalletId::new("w1"))
        .await
        .expect("get")
        .expect("wallet view");
    assert_eq!(view.balance, Money::from_cents(10_000));

    let rows = fx
        .transactions
        .list_for_wallet(&WalletId::new("w1"))
        .await
        .expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, TransactionKind::Deposit);
    assert_eq!(rows[0].id, event.transaction_id().to_string());
}

#[tokio::test]
async fn duplicate_delivery_is_a_no_op() {
    let fx = fixture();
    let event = deposited("w1", 10_000, 10_000);

    fx.handler.handle(&delivery(&event, 0)).await.expect("first");
    // Redelivery of the identical event, as after a crash between handle
    // and ack.
    fx.handler.handle(&delivery(&event, 0)).await.expect("replay");

    assert_eq!(fx.transactions.len(), 1);
    let view = fx
        .wallets
        .get(&WalletId::new("w1"))
        .await
        .expect("get")
        .expect("view");
    assert_eq!(view.balance, Money::from_cents(10_000));
}

#[tokio::test]
async fn balance_is_set_not_incremented() {
    let fx = fixture();
    let first = deposited("w1", 10_000, 10_000);
    let second = deposited("w1", 5_000, 15_000);

    fx.handler.handle(&delivery(&first, 0)).await.expect("first");
    fx.handler.handle(&delivery(&second, 1)).await.expect("second");
    // Replaying the first event re-applies its balance_after verbatim; a
    // set-based projection converges again on the next event, an
    // increment-based one would drift.
    fx.handler.handle(&delivery(&first, 0)).await.expect("replay");
    fx.handler.handle(&delivery(&second, 1)).await.expect("replay");

    let view = fx
        .wallets
        .get(&WalletId::new("w1"))
        .await
        .expect("get")
        .expect("view");
    assert_eq!(view.balance, Money::from_cents(15_000));
    assert_eq!(fx.transactions.len(), 2);
}

#[tokio::test]
async fn transfer_legs_become_suffixed_rows_with_counterparties() {
    let fx = fixture();
    let saga_id = SagaId::new();
    let debit_tx = uuid::Uuid::new_v4();
    let credit_tx = uuid::Uuid::new_v4();

    let debit = WalletEvent::MoneyWithdrawn {
        wallet_id: WalletId::new("wA"),
        amount: Money::from_cents(2_000),
        balance_after: Money::from_cents(3_000),
        kind: WithdrawalKind::TransferOut,
        saga_id: Some(saga_id),
        counterparty: Some(WalletId::new("wB")),
        transaction_id: debit_tx,
        timestamp: chrono::Utc::now(),
    };
    let credit = WalletEvent::MoneyDeposited {
        wallet_id: WalletId::new("wB"),
        amount: Money::from_cents(2_000),
        balance_after: Money::from_cents(2_000),
        kind: DepositKind::TransferIn,
        saga_id: Some(saga_id),
        counterparty: Some(WalletId::new("wA")),
        transaction_id: credit_tx,
        timestamp: chrono::Utc::now(),
    };

    fx.handler.handle(&delivery(&debit, 0)).await.expect("debit");
    fx.handler.handle(&delivery(&credit, 1)).await.expect("credit");

    let out_rows = fx
        .transactions
        .list_for_wallet(&WalletId::new("wA"))
        .await
        .expect("list A");
    assert_eq!(out_rows.len(), 1);
    assert_eq!(out_rows[0].id, format!("{debit_tx}-out"));
    assert_eq!(out_rows[0].kind, TransactionKind::TransferOut);
    assert_eq!(out_rows[0].related_wallet_id, Some(WalletId::new("wB")));

    let in_rows = fx
        .transactions
        .list_for_wallet(&WalletId::new("wB"))
        .await
        .expect("list B");
    assert_eq!(in_rows.len(), 1);
    assert_eq!(in_rows[0].id, format!("{credit_tx}-in"));
    assert_eq!(in_rows[0].kind, TransactionKind::TransferIn);
    assert_eq!(in_rows[0].related_wallet_id, Some(WalletId::new("wA")));
}

#[tokio::test]
async fn refund_becomes_a_refund_row() {
    let fx = fixture();
    let event = WalletEvent::MoneyDeposited {
        wallet_id: WalletId::new("wA"),
        amount: Money::from_cents(2_000),
        balance_after: Money::from_cents(5_000),
        kind: DepositKind::Refund,
        saga_id: Some(SagaId::new()),
        counterparty: None,
        transaction_id: uuid::Uuid::new_v4(),
        timestamp: chrono::Utc::now(),
    };

    fx.handler.handle(&delivery(&event, 0)).await.expect("handle");

    let rows = fx
        .transactions
        .list_for_wallet(&WalletId::new("wA"))
        .await
        .expect("list");
    assert_eq!(rows[0].kind, TransactionKind::Refund);
    assert_eq!(rows[0].id, event.transaction_id().to_string());
}

#[tokio::test]
async fn transfer_summary_events_are_ignored() {
    let fx = fixture();
    let event = WalletEvent::MoneyTransferred {
        saga_id: SagaId::new(),
        from_wallet_id: WalletId::new("wA"),
        to_wallet_id: WalletId::new("wB"),
        amount: Money::from_cents(2_000),
        debit_transaction_id: uuid::Uuid::new_v4(),
        credit_transaction_id: uuid::Uuid::new_v4(),
        transaction_id: uuid::Uuid::new_v4(),
        timestamp: chrono::Utc::now(),
    };

    fx.handler.handle(&delivery(&event, 0)).await.expect("handle");
    assert!(fx.transactions.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consumer_loop_applies_events_and_dead_letters_garbage() {
    let fx = fixture();
    let bus = Arc::new(InMemoryEventBus::new());
    let dead_letters = Arc::new(InMemoryDeadLetters::new());
    let (shutdown, _) = tokio::sync::broadcast::channel(1);

    let consumer = EventConsumer::new(
        "projections",
        Subscription::new("test-projections", vec!["wallet.#".to_string()]),
        bus.clone(),
        Arc::new(ProjectionHandler::new(
            fx.wallets.clone(),
            fx.transactions.clone(),
        )),
        dead_letters.clone(),
        shutdown.subscribe(),
    );
    let handle = consumer.spawn();

    // Let the consumer subscribe before publishing.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // One malformed envelope between two good events: it must be parked,
    // not block the stream.
    let good_one = deposited("w1", 10_000, 10_000);
    bus.publish(
        good_one.routing_key(),
        &good_one.to_envelope(chrono::Utc::now()).expect("envelope"),
    )
    .await
    .expect("publish");

    bus.publish(
        "wallet.money.deposited",
        &walletd_core::event::Envelope::new(
            "wallet.money.minted",
            serde_json::json!({ "eventType": "wallet.money.minted" }),
            chrono::Utc::now(),
        ),
    )
    .await
    .expect("publish garbage");

    let good_two = deposited("w1", 5_000, 15_000);
    bus.publish(
        good_two.routing_key(),
        &good_two.to_envelope(chrono::Utc::now()).expect("envelope"),
    )
    .await
    .expect("publish");

    assert!(
        eventually(|| fx.transactions.len() == 2).await,
        "both good events must land"
    );
    assert!(
        eventually(|| dead_letters.entries().len() == 1).await,
        "the malformed event must be dead-lettered"
    );
    let (consumer_name, _, error) = dead_letters.entries().remove(0);
    assert_eq!(consumer_name, "projections");
    assert!(error.contains("wallet.money.minted"));

    let _ = shutdown.send(());
    let _ = handle.await;
}
