//! The command mediator: deposit/withdraw/transfer inside the idempotency
//! envelope.
//!
//! Every mutating command follows the same shape:
//!
//! 1. `check_and_lock` the client's idempotency key (1 s deadline). A
//!    completed key short-circuits to the cached response; a key held
//!    elsewhere becomes an in-progress reply (HTTP 409).
//! 2. Run the command under the overall request deadline.
//! 3. On a domain outcome — success or failure like insufficient funds —
//!    `complete` the key with the response body, so every retry observes
//!    the first execution's result.
//! 4. On a transient failure or deadline, `release` the key so the client
//!    can safely retry.
//!
//! A concurrency conflict is retried in place up to the configured number
//! of times (default 0) before surfacing as transient.

use crate::aggregates::{
    CommandError, Committed, DepositContext, WalletError, WalletRepository, WithdrawContext,
};
use crate::idempotency::{CheckAndLock, IdempotencyError, IdempotencyStore};
use crate::saga::{TransferError, TransferOrchestrator, TransferOutcome};
use crate::types::WalletId;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use walletd_core::money::Money;

/// Mediator tuning knobs.
#[derive(Clone, Debug)]
pub struct MediatorConfig {
    /// Automatic in-place retries on a concurrency conflict.
    pub conflict_retries: u32,
    /// Overall deadline for running one command.
    pub command_deadline: Duration,
    /// Deadline for each idempotency store call.
    pub idempotency_deadline: Duration,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 0,
            command_deadline: Duration::from_secs(10),
            idempotency_deadline: Duration::from_secs(1),
        }
    }
}

/// Errors the mediator surfaces to the HTTP edge.
///
/// Domain outcomes (insufficient funds, saga failure, compensation failure)
/// are not errors — they are response bodies, cached like any success.
#[derive(Error, Debug)]
pub enum MediatorError {
    /// Input validation failed; 4xx, not retryable, lock released.
    #[error("{0}")]
    Validation(String),

    /// Concurrency conflict survived the configured retries; safe to retry
    /// with the same key once released.
    #[error("{0}")]
    Conflict(String),

    /// Transient infrastructure failure; lock released, retry-safe.
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    /// The command exceeded its deadline; lock released, retry-safe.
    #[error("Command deadline exceeded")]
    Timeout,

    /// The idempotency store itself failed.
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),
}

/// A reply from the mediator, distinguishing fresh and cached outcomes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandReply {
    /// First execution of this key; body was just computed and cached.
    Fresh(serde_json::Value),
    /// The key had already completed; body is the first execution's,
    /// returned verbatim.
    Cached(serde_json::Value),
    /// The key is currently locked by another worker.
    InProgress,
}

/// Entry point for all mutating wallet commands.
pub struct CommandMediator {
    repository: Arc<WalletRepository>,
    orchestrator: Arc<TransferOrchestrator>,
    idempotency: Arc<dyn IdempotencyStore>,
    config: MediatorConfig,
}

impl CommandMediator {
    /// Create a mediator.
    #[must_use]
    pub fn new(
        repository: Arc<WalletRepository>,
        orchestrator: Arc<TransferOrchestrator>,
        idempotency: Arc<dyn IdempotencyStore>,
        config: MediatorConfig,
    ) -> Self {
        Self {
            repository,
            orchestrator,
            idempotency,
            config,
        }
    }

    /// Deposit into a wallet (creating it on first use).
    ///
    /// # Errors
    ///
    /// See [`MediatorError`].
    pub async fn deposit(
        &self,
        key: &str,
        wallet_id: &WalletId,
        amount: Money,
    ) -> Result<CommandReply, MediatorError> {
        self.with_idempotency(key, || async {
            let committed = self
                .with_conflict_retry(|| {
                    self.repository
                        .deposit(wallet_id, amount, DepositContext::Direct)
                })
                .await;

            match committed {
                Ok(Committed { balance_after, .. }) => Ok(json!({
                    "success": true,
                    "message": "Deposit completed",
                    "balance": balance_after,
                })),
                Err(e) => Err(Self::map_command_error(e)),
            }
        })
        .await
    }

    /// Withdraw from a wallet.
    ///
    /// Insufficient funds is a domain outcome (`success: false`), not an
    /// error: the response is cached under the key like any success.
    ///
    /// # Errors
    ///
    /// See [`MediatorError`].
    pub async fn withdraw(
        &self,
        key: &str,
        wallet_id: &WalletId,
        amount: Money,
    ) -> Result<CommandReply, MediatorError> {
        self.with_idempotency(key, || async {
            let committed = self
                .with_conflict_retry(|| {
                    self.repository
                        .withdraw(wallet_id, amount, WithdrawContext::Direct)
                })
                .await;

            match committed {
                Ok(Committed { balance_after, .. }) => Ok(json!({
                    "success": true,
                    "message": "Withdrawal completed",
                    "balance": balance_after,
                })),
                Err(CommandError::Domain(e @ WalletError::InsufficientFunds { .. })) => {
                    Ok(json!({
                        "success": false,
                        "message": e.to_string(),
                        "error": e.to_string(),
                    }))
                }
                Err(e) => Err(Self::map_command_error(e)),
            }
        })
        .await
    }

    /// Transfer between two wallets via the saga.
    ///
    /// # Errors
    ///
    /// See [`MediatorError`].
    pub async fn transfer(
        &self,
        key: &str,
        from: &WalletId,
        to: &WalletId,
        amount: Money,
    ) -> Result<CommandReply, MediatorError> {
        self.with_idempotency(key, || async {
            if amount.is_zero() {
                return Err(MediatorError::Validation(
                    WalletError::InvalidAmount.to_string(),
                ));
            }

            match self.orchestrator.run(from, to, amount).await {
                Ok(TransferOutcome::Completed {
                    from_balance,
                    to_balance,
                    ..
                }) => Ok(json!({
                    "success": true,
                    "message": "Transfer completed",
                    "fromBalance": from_balance,
                    "toBalance": to_balance,
                })),
                Ok(TransferOutcome::Failed { reason, .. }) => Ok(json!({
                    "success": false,
                    "message": reason.clone(),
                    "error": reason,
                })),
                Ok(TransferOutcome::CompensationFailed { saga_id, reason }) => Ok(json!({
                    "success": false,
                    "critical": true,
                    "message": "CRITICAL: transfer compensation failed, operator attention required",
                    "error": reason,
                    "sagaId": saga_id,
                })),
                Err(TransferError::Infrastructure(e)) => Err(MediatorError::Infrastructure(e)),
            }
        })
        .await
    }

    fn map_command_error(e: CommandError) -> MediatorError {
        match e {
            CommandError::Domain(domain) => MediatorError::Validation(domain.to_string()),
            CommandError::Conflict { wallet_id } => MediatorError::Conflict(format!(
                "Concurrent update on wallet {wallet_id}, retry with the same idempotency key"
            )),
            CommandError::Infrastructure(e) => MediatorError::Infrastructure(e),
        }
    }

    async fn with_conflict_retry<F, Fut>(&self, op: F) -> Result<Committed, CommandError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Committed, CommandError>>,
    {
        let mut attempts = 0;
        loop {
            match op().await {
                Err(CommandError::Conflict { wallet_id })
                    if attempts < self.config.conflict_retries =>
                {
                    attempts += 1;
                    tracing::debug!(
                        wallet_id = %wallet_id,
                        attempt = attempts,
                        "Retrying after concurrency conflict"
                    );
                    metrics::counter!("mediator.conflict_retries").increment(1);
                }
                other => return other,
            }
        }
    }

    async fn with_idempotency<F, Fut>(
        &self,
        key: &str,
        run: F,
    ) -> Result<CommandReply, MediatorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, MediatorError>>,
    {
        let lock = timeout(
            self.config.idempotency_deadline,
            self.idempotency.check_and_lock(key),
        )
        .await
        .map_err(|_| MediatorError::Timeout)??;

        match lock {
            CheckAndLock::Completed(body) => {
                tracing::debug!(key = key, "Returning cached idempotent response");
                Ok(CommandReply::Cached(body))
            }
            CheckAndLock::InProgress => Ok(CommandReply::InProgress),
            CheckAndLock::NewLock => match timeout(self.config.command_deadline, run()).await {
                Ok(Ok(body)) => {
                    let completed = timeout(
                        self.config.idempotency_deadline,
                        self.idempotency.complete(key, &body),
                    )
                    .await;
                    if !matches!(completed, Ok(Ok(()))) {
                        // The response is already decided; losing the cache
                        // entry only costs a future retry its shortcut.
                        tracing::warn!(key = key, "Failed to cache idempotent response");
                    }
                    Ok(CommandReply::Fresh(body))
                }
                Ok(Err(e)) => {
                    self.release_quietly(key).await;
                    Err(e)
                }
                Err(_) => {
                    self.release_quietly(key).await;
                    Err(MediatorError::Timeout)
                }
            },
        }
    }

    async fn release_quietly(&self, key: &str) {
        let released = timeout(
            self.config.idempotency_deadline,
            self.idempotency.release(key),
        )
        .await;
        if !matches!(released, Ok(Ok(()))) {
            // The TTL will reap the lock eventually; until then the client
            // sees 409 instead of being able to retry.
            tracing::warn!(key = key, "Failed to release idempotency lock");
        }
    }
}
