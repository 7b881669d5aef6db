//! Router configuration.

use super::health::ping;
use super::state::AppState;
use crate::api::{commands, queries};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use walletd_web::correlation_id_layer;

/// Build the complete Axum router.
///
/// Mutating endpoints require the `x-idempotency-key` header; reads never
/// do.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/deposit", post(commands::deposit))
        .route("/withdraw", post(commands::withdraw))
        .route("/transfer", post(commands::transfer))
        .route("/balance/:wallet_id", get(queries::balance))
        .route("/transactions/:wallet_id", get(queries::transactions))
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
