//! Transfer saga compensation and recovery tests.
//!
//! Covers scenario S5 (forced credit failure refunds the source), the
//! CRITICAL stuck-`COMPENSATING` state when the refund also fails, and the
//! recovery scanner's handling of every stalled status.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::TestApp;
use walletd::aggregates::WithdrawContext;
use walletd::mediator::CommandReply;
use walletd::runtime::SagaRecovery;
use walletd::saga::{SagaStatus, SagaStore, TransferSaga};
use walletd::types::{SagaId, WalletId};
use walletd_core::money::Money;

fn body(reply: &CommandReply) -> &serde_json::Value {
    match reply {
        CommandReply::Fresh(body) | CommandReply::Cached(body) => body,
        CommandReply::InProgress => panic!("unexpected in-progress reply"),
    }
}

fn recovery(app: &TestApp) -> SagaRecovery {
    let (shutdown, _) = tokio::sync::broadcast::channel(1);
    SagaRecovery::new(
        app.sagas.clone(),
        app.orchestrator.clone(),
        app.repository.clone(),
        app.clock.clone(),
        Duration::from_secs(3600),   // never ticks during a test
        chrono::Duration::zero(),    // everything already counts as stalled
        shutdown.subscribe(),
    )
}

#[tokio::test]
async fn s5_failed_credit_refunds_the_source() {
    let app = TestApp::new();
    let wa = WalletId::new("wA");
    let wb = WalletId::new("wB");

    app.mediator
        .deposit("SEED", &wa, Money::from_cents(10_000))
        .await
        .expect("seed");

    // Kill the destination wallet's append: the credit must fail.
    app.event_store.fail_appends_for(&wb.stream_id());

    let reply = app
        .mediator
        .transfer("T1", &wa, &wb, Money::from_cents(10_000))
        .await
        .expect("transfer");

    let body = body(&reply);
    assert_eq!(body["success"], serde_json::json!(false));
    assert!(body["message"]
        .as_str()
        .is_some_and(|message| message.contains("refunded")));

    // The source ends where it started.
    let wallet = app.repository.load(&wa).await.expect("load");
    assert_eq!(wallet.balance, Money::from_cents(10_000));

    // Saga is terminal FAILED with a recorded compensation leg.
    let saga = app.sagas.all().into_iter().next().expect("one saga");
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(saga.debit_tx_id.is_some());
    assert!(saga.credit_tx_id.is_none());
    assert!(saga.compensation_tx_id.is_some());

    // The compensation lifecycle went out on the bus.
    assert_eq!(app.bus.published_on("wallet.transfer.compensation.initiated").len(), 1);
    assert_eq!(app.bus.published_on("wallet.transfer.source.refunded").len(), 1);
    assert_eq!(app.bus.published_on("wallet.transfer.failed").len(), 1);
    assert!(app.bus.published_on("wallet.transfer.completed").is_empty());
}

#[tokio::test]
async fn failed_refund_leaves_the_saga_compensating_with_a_critical_reply() {
    let app = TestApp::new();
    let wa = WalletId::new("wA");
    let wb = WalletId::new("wB");

    app.mediator
        .deposit("SEED", &wa, Money::from_cents(10_000))
        .await
        .expect("seed");

    // Credit always fails; the source allows exactly one more append (the
    // debit), then the refund fails too.
    app.event_store.fail_appends_for(&wb.stream_id());
    app.event_store.fail_appends_after(&wa.stream_id(), 1);

    let reply = app
        .mediator
        .transfer("T1", &wa, &wb, Money::from_cents(10_000))
        .await
        .expect("transfer");

    let body = body(&reply);
    assert_eq!(body["success"], serde_json::json!(false));
    assert_eq!(body["critical"], serde_json::json!(true));
    assert!(body["sagaId"].is_string());

    // The saga is stuck COMPENSATING and the source is short the funds.
    let saga = app.sagas.all().into_iter().next().expect("one saga");
    assert_eq!(saga.status, SagaStatus::Compensating);
    let wallet = app.repository.load(&wa).await.expect("load");
    assert_eq!(wallet.balance, Money::ZERO);
}

#[tokio::test]
async fn recovery_retries_the_refund_of_a_compensating_saga() {
    let app = TestApp::new();
    let wa = WalletId::new("wA");
    let wb = WalletId::new("wB");

    app.mediator
        .deposit("SEED", &wa, Money::from_cents(10_000))
        .await
        .expect("seed");
    app.event_store.fail_appends_for(&wb.stream_id());
    app.event_store.fail_appends_after(&wa.stream_id(), 1);

    app.mediator
        .transfer("T1", &wa, &wb, Money::from_cents(10_000))
        .await
        .expect("transfer");

    // Storage recovers; the next sweep lands the refund.
    app.event_store.heal(&wa.stream_id());
    recovery(&app).sweep().await;

    let saga = app.sagas.all().into_iter().next().expect("one saga");
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(saga.compensation_tx_id.is_some());

    let wallet = app.repository.load(&wa).await.expect("load");
    assert_eq!(wallet.balance, Money::from_cents(10_000));
}

#[tokio::test]
async fn recovery_resumes_a_source_debited_saga() {
    let app = TestApp::new();
    let wa = WalletId::new("wA");
    let wb = WalletId::new("wB");

    app.mediator
        .deposit("SEED", &wa, Money::from_cents(10_000))
        .await
        .expect("seed");

    // Simulate a crash after the debit committed and the saga row was
    // updated, but before the credit ran.
    let saga_id = SagaId::new();
    let now = chrono::Utc::now();
    app.sagas
        .insert(&TransferSaga::new(
            saga_id,
            wa.clone(),
            wb.clone(),
            Money::from_cents(4_000),
            now,
        ))
        .await
        .expect("insert saga");
    let debit = app
        .repository
        .withdraw(
            &wa,
            Money::from_cents(4_000),
            WithdrawContext::TransferOut {
                saga_id,
                to: wb.clone(),
            },
        )
        .await
        .expect("debit");
    app.sagas
        .mark_source_debited(saga_id, debit.event.transaction_id(), now)
        .await
        .expect("mark debited");

    recovery(&app).sweep().await;

    let saga = app.sagas.get(saga_id).await.expect("get").expect("saga");
    assert_eq!(saga.status, SagaStatus::Completed);
    assert!(saga.credit_tx_id.is_some());

    let a = app.repository.load(&wa).await.expect("load A").balance;
    let b = app.repository.load(&wb).await.expect("load B").balance;
    assert_eq!(a, Money::from_cents(6_000));
    assert_eq!(b, Money::from_cents(4_000));
}

#[tokio::test]
async fn recovery_fails_a_stalled_initiated_saga_without_a_debit() {
    let app = TestApp::new();
    let wa = WalletId::new("wA");
    let wb = WalletId::new("wB");

    let saga_id = SagaId::new();
    app.sagas
        .insert(&TransferSaga::new(
            saga_id,
            wa.clone(),
            wb.clone(),
            Money::from_cents(100),
            chrono::Utc::now(),
        ))
        .await
        .expect("insert saga");

    recovery(&app).sweep().await;

    let saga = app.sagas.get(saga_id).await.expect("get").expect("saga");
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(saga.debit_tx_id.is_none());
    assert_eq!(app.bus.published_on("wallet.transfer.failed").len(), 1);
}

#[tokio::test]
async fn recovery_detects_a_debit_hidden_behind_a_stalled_initiated_saga() {
    let app = TestApp::new();
    let wa = WalletId::new("wA");
    let wb = WalletId::new("wB");

    app.mediator
        .deposit("SEED", &wa, Money::from_cents(10_000))
        .await
        .expect("seed");

    // Crash window: the debit committed but the saga row still says
    // INITIATED.
    let saga_id = SagaId::new();
    app.sagas
        .insert(&TransferSaga::new(
            saga_id,
            wa.clone(),
            wb.clone(),
            Money::from_cents(2_500),
            chrono::Utc::now(),
        ))
        .await
        .expect("insert saga");
    app.repository
        .withdraw(
            &wa,
            Money::from_cents(2_500),
            WithdrawContext::TransferOut {
                saga_id,
                to: wb.clone(),
            },
        )
        .await
        .expect("debit");

    recovery(&app).sweep().await;

    // The scanner must complete the transfer, not fail it (failing would
    // strand the debited funds).
    let saga = app.sagas.get(saga_id).await.expect("get").expect("saga");
    assert_eq!(saga.status, SagaStatus::Completed);

    let a = app.repository.load(&wa).await.expect("load A").balance;
    let b = app.repository.load(&wb).await.expect("load B").balance;
    assert_eq!(a.cents() + b.cents(), 10_000);
    assert_eq!(b, Money::from_cents(2_500));
}

#[tokio::test]
async fn terminal_sagas_are_never_rewritten() {
    let app = TestApp::new();
    let wa = WalletId::new("wA");
    let wb = WalletId::new("wB");

    app.mediator
        .deposit("SEED", &wa, Money::from_cents(10_000))
        .await
        .expect("seed");
    app.mediator
        .transfer("T1", &wa, &wb, Money::from_cents(1_000))
        .await
        .expect("transfer");

    let saga = app.sagas.all().into_iter().next().expect("one saga");
    assert_eq!(saga.status, SagaStatus::Completed);

    // A replayed transition against the terminal row must be refused.
    let err = app
        .sagas
        .mark_failed(saga.saga_id, None, Some("replay"), chrono::Utc::now())
        .await
        .expect_err("terminal saga must not transition");
    assert!(err.to_string().contains("not allowed"));

    let unchanged = app
        .sagas
        .get(saga.saga_id)
        .await
        .expect("get")
        .expect("saga");
    assert_eq!(unchanged.status, SagaStatus::Completed);
}
