//! Shared test fixtures: the full command stack assembled over the
//! in-memory infrastructure.

#![allow(dead_code)] // Not every suite uses every helper.

use std::sync::Arc;
use std::time::Duration;
use walletd::aggregates::WalletRepository;
use walletd::mediator::{CommandMediator, MediatorConfig};
use walletd::mocks::{InMemoryIdempotencyStore, InMemorySagaStore};
use walletd::saga::TransferOrchestrator;
use walletd_core::environment::SystemClock;
use walletd_testing::{FailingEventStore, InMemoryEventBus, InMemoryEventStore};

/// The command stack over in-memory infrastructure.
///
/// The event store is always wrapped in a [`FailingEventStore`] so tests
/// can inject append failures per wallet; with no failures configured it is
/// transparent.
pub struct TestApp {
    pub mediator: Arc<CommandMediator>,
    pub repository: Arc<WalletRepository>,
    pub orchestrator: Arc<TransferOrchestrator>,
    pub event_store: Arc<FailingEventStore>,
    pub bus: Arc<InMemoryEventBus>,
    pub sagas: Arc<InMemorySagaStore>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub clock: Arc<SystemClock>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_conflict_retries(0)
    }

    /// Build the stack with the given number of automatic conflict
    /// retries (concurrency suites use a few so every request resolves to
    /// a domain outcome).
    pub fn with_conflict_retries(conflict_retries: u32) -> Self {
        let event_store = Arc::new(FailingEventStore::new(Arc::new(InMemoryEventStore::new())));
        let bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(SystemClock);
        let sagas = Arc::new(InMemorySagaStore::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());

        let repository = Arc::new(WalletRepository::new(
            event_store.clone(),
            bus.clone(),
            clock.clone(),
        ));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            repository.clone(),
            sagas.clone(),
            bus.clone(),
            clock.clone(),
        ));
        let mediator = Arc::new(CommandMediator::new(
            repository.clone(),
            orchestrator.clone(),
            idempotency.clone(),
            MediatorConfig {
                conflict_retries,
                command_deadline: Duration::from_secs(5),
                idempotency_deadline: Duration::from_secs(1),
            },
        ));

        Self {
            mediator,
            repository,
            orchestrator,
            event_store,
            bus,
            sagas,
            idempotency,
            clock,
        }
    }
}

/// Poll `check` every 10 ms until it passes or ~2 s elapse.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
