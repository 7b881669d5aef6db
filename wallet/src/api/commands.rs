//! Mutating endpoints: `/deposit`, `/withdraw`, `/transfer`.
//!
//! Every handler requires the `x-idempotency-key` header and returns 201
//! for any domain outcome, success or not. A replayed key returns the first
//! execution's body annotated with `_cached: true` and `_idempotencyKey`;
//! a key currently held by another worker returns 409.

use crate::mediator::{CommandReply, MediatorError};
use crate::server::state::AppState;
use crate::types::WalletId;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use walletd_core::money::Money;
use walletd_web::{AppError, IdempotencyKey, JsonBody};

/// Body of `/deposit` and `/withdraw`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AmountRequest {
    /// The wallet to credit or debit.
    pub wallet_id: WalletId,
    /// The amount, as a decimal number with up to two decimal places.
    pub amount: Money,
}

/// Body of `/transfer`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransferRequest {
    /// Source wallet.
    pub from_wallet_id: WalletId,
    /// Destination wallet.
    pub to_wallet_id: WalletId,
    /// The amount to move.
    pub amount: Money,
}

/// POST `/deposit`.
pub async fn deposit(
    State(state): State<AppState>,
    IdempotencyKey(key): IdempotencyKey,
    JsonBody(request): JsonBody<AmountRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let reply = state
        .mediator
        .deposit(&key, &request.wallet_id, request.amount)
        .await
        .map_err(map_mediator_error)?;
    respond(reply, &key)
}

/// POST `/withdraw`.
pub async fn withdraw(
    State(state): State<AppState>,
    IdempotencyKey(key): IdempotencyKey,
    JsonBody(request): JsonBody<AmountRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let reply = state
        .mediator
        .withdraw(&key, &request.wallet_id, request.amount)
        .await
        .map_err(map_mediator_error)?;
    respond(reply, &key)
}

/// POST `/transfer`.
pub async fn transfer(
    State(state): State<AppState>,
    IdempotencyKey(key): IdempotencyKey,
    JsonBody(request): JsonBody<TransferRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let reply = state
        .mediator
        .transfer(
            &key,
            &request.from_wallet_id,
            &request.to_wallet_id,
            request.amount,
        )
        .await
        .map_err(map_mediator_error)?;
    respond(reply, &key)
}

fn respond(
    reply: CommandReply,
    key: &str,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    match reply {
        CommandReply::Fresh(body) => Ok((StatusCode::CREATED, Json(body))),
        CommandReply::Cached(mut body) => {
            if let Some(object) = body.as_object_mut() {
                object.insert("_cached".to_string(), serde_json::Value::Bool(true));
                object.insert(
                    "_idempotencyKey".to_string(),
                    serde_json::Value::String(key.to_string()),
                );
            }
            Ok((StatusCode::CREATED, Json(body)))
        }
        CommandReply::InProgress => Err(AppError::conflict(
            "A request with this idempotency key is already in progress",
        )),
    }
}

fn map_mediator_error(e: MediatorError) -> AppError {
    match e {
        MediatorError::Validation(message) => AppError::bad_request(message),
        MediatorError::Conflict(message) => AppError::conflict(message),
        MediatorError::Infrastructure(message) => AppError::unavailable(message),
        MediatorError::Timeout => AppError::timeout("Command deadline exceeded, safe to retry"),
        MediatorError::Idempotency(e) => AppError::unavailable(e.to_string()),
    }
}
