//! Read endpoints: `/balance/{walletId}` and `/transactions/{walletId}`.
//!
//! Reads never require an idempotency key and are served from the read
//! models, so they are eventually consistent with the log.

use crate::projections::{TransactionRow, WalletView};
use crate::server::state::AppState;
use crate::types::WalletId;
use axum::extract::{Path, State};
use axum::Json;
use walletd_web::AppError;

/// GET `/balance/{walletId}`.
pub async fn balance(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<WalletView>, AppError> {
    let wallet_id = WalletId::new(wallet_id);
    let view = state
        .wallets
        .get(&wallet_id)
        .await
        .map_err(|e| AppError::unavailable(e.to_string()))?
        .ok_or_else(|| AppError::not_found("Wallet", &wallet_id))?;

    Ok(Json(view))
}

/// GET `/transactions/{walletId}`.
///
/// Returns an empty array for a wallet with no history (the wallet may
/// simply not exist yet — wallets are implicit).
pub async fn transactions(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<Vec<TransactionRow>>, AppError> {
    let wallet_id = WalletId::new(wallet_id);
    let rows = state
        .transactions
        .list_for_wallet(&wallet_id)
        .await
        .map_err(|e| AppError::unavailable(e.to_string()))?;

    Ok(Json(rows))
}
