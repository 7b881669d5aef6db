//! HTTP contract tests over the in-memory stack.
//!
//! Exercises the router end to end with `tower::ServiceExt::oneshot`: the
//! idempotency header requirement, cached-response annotations, strict body
//! validation, the ping endpoint, and reads served by the projection
//! consumer.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use support::{eventually, TestApp};
use tower::ServiceExt;
use walletd::mocks::{InMemoryDeadLetters, InMemoryTransactionReadModel, InMemoryWalletReadModel};
use walletd::projections::ProjectionHandler;
use walletd::runtime::EventConsumer;
use walletd::server::health::StaticProbe;
use walletd::server::{build_router, AppState};
use walletd_core::money::Money;

struct HttpApp {
    app: TestApp,
    router: axum::Router,
    wallets: Arc<InMemoryWalletReadModel>,
    transactions: Arc<InMemoryTransactionReadModel>,
    shutdown: tokio::sync::broadcast::Sender<()>,
}

/// Assemble the router over the in-memory stack with a live projection
/// consumer, as `bootstrap::build` does over the real infrastructure.
async fn http_app() -> HttpApp {
    let app = TestApp::new();
    let wallets = Arc::new(InMemoryWalletReadModel::new());
    let transactions = Arc::new(InMemoryTransactionReadModel::new());
    let (shutdown, _) = tokio::sync::broadcast::channel(1);

    let consumer = EventConsumer::new(
        "projections",
        walletd_core::event_bus::Subscription::new(
            "test-projections",
            vec!["wallet.#".to_string()],
        ),
        app.bus.clone(),
        Arc::new(ProjectionHandler::new(wallets.clone(), transactions.clone())),
        Arc::new(InMemoryDeadLetters::new()),
        shutdown.subscribe(),
    );
    let _consumer_handle = consumer.spawn();
    // Let the consumer subscribe before any test traffic publishes.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let state = AppState {
        mediator: app.mediator.clone(),
        wallets: wallets.clone(),
        transactions: transactions.clone(),
        command_probe: Arc::new(StaticProbe(true)),
        query_probe: Arc::new(StaticProbe(true)),
    };

    HttpApp {
        app,
        router: build_router(state),
        wallets,
        transactions,
        shutdown,
    }
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request should complete");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("JSON body")
    };
    (status, body)
}

fn post(path: &str, key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-idempotency-key", key);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_idempotency_key_is_400_naming_the_header() {
    let http = http_app().await;

    let (status, body) = send(
        &http.router,
        post(
            "/deposit",
            None,
            serde_json::json!({ "walletId": "w1", "amount": 100 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .is_some_and(|message| message.contains("x-idempotency-key")));
    let _ = http.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deposit_then_query_balance_and_history() {
    let http = http_app().await;

    let (status, body) = send(
        &http.router,
        post(
            "/deposit",
            Some("K1"),
            serde_json::json!({ "walletId": "w1", "amount": 100 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], serde_json::json!(true));
    assert_eq!(body["balance"], serde_json::json!(100.0));

    // The projection settles eventually.
    let wallets = http.wallets.clone();
    assert!(
        eventually(|| {
            wallets.balance_of(&walletd::types::WalletId::new("w1"))
                == Some(Money::from_cents(10_000))
        })
        .await
    );

    let (status, body) = send(&http.router, get("/balance/w1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], serde_json::json!("w1"));
    assert_eq!(body["balance"], serde_json::json!(100.0));
    assert!(body["createdAt"].is_string());
    assert!(body["updatedAt"].is_string());

    let (status, body) = send(&http.router, get("/transactions/w1")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().expect("array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["type"], serde_json::json!("DEPOSIT"));
    assert_eq!(rows[0]["amount"], serde_json::json!(100.0));
    assert_eq!(rows[0]["walletId"], serde_json::json!("w1"));

    let _ = http.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replayed_key_returns_the_first_body_with_cache_annotations() {
    let http = http_app().await;

    send(
        &http.router,
        post(
            "/deposit",
            Some("K1"),
            serde_json::json!({ "walletId": "w1", "amount": 100 }),
        ),
    )
    .await;

    // Different body, same key: first outcome wins.
    let (status, body) = send(
        &http.router,
        post(
            "/deposit",
            Some("K1"),
            serde_json::json!({ "walletId": "w1", "amount": 999 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["balance"], serde_json::json!(100.0));
    assert_eq!(body["_cached"], serde_json::json!(true));
    assert_eq!(body["_idempotencyKey"], serde_json::json!("K1"));

    let _ = http.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_key_is_409() {
    let http = http_app().await;

    use walletd::idempotency::IdempotencyStore;
    http.app
        .idempotency
        .check_and_lock("HELD")
        .await
        .expect("lock");

    let (status, _) = send(
        &http.router,
        post(
            "/deposit",
            Some("HELD"),
            serde_json::json!({ "walletId": "w1", "amount": 100 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    let _ = http.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_fields_and_malformed_json_are_400() {
    let http = http_app().await;

    let (status, _) = send(
        &http.router,
        post(
            "/deposit",
            Some("K1"),
            serde_json::json!({ "walletId": "w1", "amount": 100, "extra": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/deposit")
        .header("content-type", "application/json")
        .header("x-idempotency-key", "K2")
        .body(Body::from("{not json"))
        .expect("request");
    let (status, _) = send(&http.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let _ = http.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn negative_amount_is_400() {
    let http = http_app().await;

    let (status, _) = send(
        &http.router,
        post(
            "/deposit",
            Some("K1"),
            serde_json::json!({ "walletId": "w1", "amount": -5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let _ = http.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_wallet_balance_is_404_but_history_is_empty_array() {
    let http = http_app().await;

    let (status, _) = send(&http.router, get("/balance/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&http.router, get("/transactions/ghost")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));

    let _ = http.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_reports_both_services() {
    let http = http_app().await;

    let (status, body) = send(&http.router, get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["commandService"], serde_json::json!("ok"));
    assert_eq!(body["queryService"], serde_json::json!("ok"));

    let _ = http.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transfer_over_http_settles_both_read_models() {
    let http = http_app().await;

    send(
        &http.router,
        post(
            "/deposit",
            Some("SA"),
            serde_json::json!({ "walletId": "wA", "amount": 500 }),
        ),
    )
    .await;
    send(
        &http.router,
        post(
            "/deposit",
            Some("SB"),
            serde_json::json!({ "walletId": "wB", "amount": 500 }),
        ),
    )
    .await;

    let (status, body) = send(
        &http.router,
        post(
            "/transfer",
            Some("T1"),
            serde_json::json!({ "fromWalletId": "wA", "toWalletId": "wB", "amount": 200 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], serde_json::json!(true));
    assert_eq!(body["fromBalance"], serde_json::json!(300.0));
    assert_eq!(body["toBalance"], serde_json::json!(700.0));

    // Four ledger rows once the stream drains: two seeds and two legs.
    let transactions = http.transactions.clone();
    assert!(eventually(|| transactions.len() == 4).await);

    let (_, rows) = send(&http.router, get("/transactions/wA")).await;
    let kinds: Vec<&str> = rows
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|row| row["type"].as_str())
        .collect();
    assert!(kinds.contains(&"DEPOSIT"));
    assert!(kinds.contains(&"TRANSFER_OUT"));

    let _ = http.shutdown.send(());
}
