//! Saga recovery scanner.
//!
//! A crash can strand a transfer saga in a non-terminal state: the process
//! died after persisting `INITIATED`, after the debit committed but before
//! the credit (`SOURCE_DEBITED`), or while the refund kept failing
//! (`COMPENSATING`). This periodic task sweeps sagas whose `updated_at` is
//! older than a threshold and pushes each toward a terminal state:
//!
//! - `SOURCE_DEBITED` → resume the credit (then the normal
//!   completion/compensation path).
//! - `COMPENSATING` → retry the refund; until it lands, the saga stays
//!   visible and is re-reported at error level each sweep.
//! - `INITIATED` → check the source wallet's stream for a committed debit
//!   leg carrying this saga id. If one exists the crash hit between the
//!   debit and the status update, so the saga is really source-debited and
//!   is resumed; otherwise nothing ever committed and the saga is failed.

use crate::aggregates::WalletRepository;
use crate::saga::{SagaStatus, SagaStore, TransferOrchestrator, TransferOutcome, TransferSaga};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use walletd_core::environment::Clock;

/// Periodic scanner that drives stalled sagas to rest.
pub struct SagaRecovery {
    sagas: Arc<dyn SagaStore>,
    orchestrator: Arc<TransferOrchestrator>,
    repository: Arc<WalletRepository>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    min_age: chrono::Duration,
    shutdown: broadcast::Receiver<()>,
}

impl SagaRecovery {
    /// Batch size per sweep.
    const SWEEP_LIMIT: usize = 50;

    /// Create a scanner.
    ///
    /// * `interval` — how often to sweep
    /// * `min_age` — only sagas untouched for at least this long are
    ///   considered stalled (in-flight requests must not be raced)
    #[must_use]
    pub fn new(
        sagas: Arc<dyn SagaStore>,
        orchestrator: Arc<TransferOrchestrator>,
        repository: Arc<WalletRepository>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        min_age: chrono::Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            sagas,
            orchestrator,
            repository,
            clock,
            interval,
            min_age,
            shutdown,
        }
    }

    /// Spawn the scanner as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(interval = ?self.interval, "Saga recovery scanner started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Saga recovery scanner received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("Saga recovery scanner stopped");
    }

    /// One sweep over stalled sagas.
    pub async fn sweep(&self) {
        let older_than = self.clock.now() - self.min_age;
        let stalled = match self
            .sagas
            .list_stalled(
                &[
                    SagaStatus::Initiated,
                    SagaStatus::SourceDebited,
                    SagaStatus::Compensating,
                ],
                older_than,
                Self::SWEEP_LIMIT,
            )
            .await
        {
            Ok(stalled) => stalled,
            Err(e) => {
                error!(error = %e, "Failed to list stalled sagas");
                return;
            }
        };

        if stalled.is_empty() {
            return;
        }

        info!(count = stalled.len(), "Recovering stalled sagas");
        metrics::counter!("saga.recovery.swept").increment(stalled.len() as u64);

        for saga in stalled {
            self.recover_one(saga).await;
        }
    }

    async fn recover_one(&self, mut saga: TransferSaga) {
        if saga.status == SagaStatus::Initiated {
            // Look for a committed transfer-out leg carrying this saga's id
            // in the source wallet's stream. If the stream cannot be read,
            // skip the saga this sweep rather than risk failing one whose
            // debit committed.
            let debit = match self
                .repository
                .find_transfer_debit(&saga.from_wallet_id, saga.saga_id)
                .await
            {
                Ok(debit) => debit,
                Err(e) => {
                    error!(saga_id = %saga.saga_id, error = %e, "Could not inspect source stream");
                    return;
                }
            };

            match debit {
                // The debit landed but the status update was lost: the saga
                // is really source-debited. Patch our in-memory view and
                // fall through to resume.
                Some(debit_tx_id) => {
                    warn!(saga_id = %saga.saga_id, "INITIATED saga has a committed debit, resuming");
                    if let Err(e) = self
                        .sagas
                        .mark_source_debited(saga.saga_id, debit_tx_id, self.clock.now())
                        .await
                    {
                        error!(saga_id = %saga.saga_id, error = %e, "Failed to record recovered debit");
                        return;
                    }
                    saga.status = SagaStatus::SourceDebited;
                    saga.debit_tx_id = Some(debit_tx_id);
                }
                None => {
                    info!(saga_id = %saga.saga_id, "Failing stalled INITIATED saga (no debit committed)");
                    if let Err(e) = self
                        .orchestrator
                        .abort_initiated(&saga, "saga stalled before debit; recovered as failed")
                        .await
                    {
                        error!(saga_id = %saga.saga_id, error = %e, "Failed to abort stalled saga");
                    }
                    return;
                }
            }
        }

        match self.orchestrator.resume(&saga).await {
            Ok(TransferOutcome::Completed { saga_id, .. }) => {
                info!(saga_id = %saga_id, "Recovered saga to COMPLETED");
            }
            Ok(TransferOutcome::Failed { saga_id, .. }) => {
                info!(saga_id = %saga_id, "Recovered saga to FAILED (compensated)");
            }
            Ok(TransferOutcome::CompensationFailed { saga_id, reason }) => {
                error!(
                    saga_id = %saga_id,
                    reason = %reason,
                    "CRITICAL: saga still COMPENSATING after recovery attempt"
                );
                metrics::counter!("saga.recovery.still_compensating").increment(1);
            }
            Err(e) => {
                error!(saga_id = %saga.saga_id, error = %e, "Saga recovery attempt failed");
            }
        }
    }
}
