//! Resource construction and wiring.
//!
//! Builds every collaborator from [`Config`], runs migrations, and spawns
//! the background tasks (projection consumer, fraud consumer, saga
//! recovery). All components are constructed here and injected — nothing
//! reaches for a global.

use crate::config::Config;
use crate::events::MONEY_TOPICS;
use crate::fraud::postgres::run_fraud_migrations;
use crate::fraud::{FraudHandler, PostgresFraudStore};
use crate::idempotency::RedisIdempotencyStore;
use crate::mediator::{CommandMediator, MediatorConfig};
use crate::projections::postgres::run_projection_migrations;
use crate::projections::{
    PostgresTransactionReadModel, PostgresWalletReadModel, ProjectionHandler,
};
use crate::runtime::{DeadLetterSink, EventConsumer, SagaRecovery};
use crate::saga::{PostgresSagaStore, TransferOrchestrator};
use crate::server::health::PgPoolProbe;
use crate::server::AppState;
use crate::aggregates::WalletRepository;
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use walletd_core::environment::{Clock, SystemClock};
use walletd_core::event_bus::{EventBus, Subscription};
use walletd_core::event_store::EventStore;
use walletd_postgres::{DeadLetterStore, PostgresEventStore};
use walletd_redpanda::RedpandaEventBus;

/// A fully wired application.
pub struct Application {
    /// Shared handler state for the HTTP router.
    pub state: AppState,
    /// Broadcast sender that stops every background task.
    pub shutdown: broadcast::Sender<()>,
    /// Handles of the spawned background tasks.
    pub background: Vec<JoinHandle<()>>,
}

/// Build the application from configuration.
///
/// # Errors
///
/// Returns an error if any backing service is unreachable or a migration
/// fails.
pub async fn build(config: &Config) -> anyhow::Result<Application> {
    info!("Connecting to event store database");
    let event_store = PostgresEventStore::new(&config.event_store.url)
        .await
        .context("event store connection")?;
    event_store
        .run_migrations()
        .await
        .context("event store migrations")?;
    let write_pool = event_store.pool().clone();

    info!("Connecting to projection database");
    let projection_pool = PgPoolOptions::new()
        .max_connections(config.projections.max_connections)
        .connect(&config.projections.url)
        .await
        .context("projection database connection")?;
    run_projection_migrations(&projection_pool)
        .await
        .context("projection migrations")?;

    info!("Connecting to fraud database");
    let fraud_pool = PgPoolOptions::new()
        .max_connections(config.fraud.max_connections)
        .connect(&config.fraud.url)
        .await
        .context("fraud database connection")?;
    run_fraud_migrations(&fraud_pool)
        .await
        .context("fraud migrations")?;

    info!(brokers = %config.redpanda.brokers, "Connecting to event bus");
    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .producer_acks("all")
            .build()
            .context("event bus")?,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let event_store: Arc<dyn EventStore> = Arc::new(event_store);

    let repository = Arc::new(WalletRepository::new(
        event_store,
        event_bus.clone(),
        clock.clone(),
    ));
    let sagas = Arc::new(PostgresSagaStore::new(write_pool.clone()));
    let orchestrator = Arc::new(TransferOrchestrator::new(
        repository.clone(),
        sagas.clone(),
        event_bus.clone(),
        clock.clone(),
    ));

    let idempotency = Arc::new(
        RedisIdempotencyStore::new(
            &config.redis.url,
            Duration::from_secs(config.idempotency_ttl_seconds),
        )
        .context("idempotency store")?,
    );
    let mediator = Arc::new(CommandMediator::new(
        repository.clone(),
        orchestrator.clone(),
        idempotency,
        MediatorConfig {
            conflict_retries: config.mediator.conflict_retries,
            command_deadline: Duration::from_secs(config.mediator.command_deadline_seconds),
            idempotency_deadline: Duration::from_secs(
                config.mediator.idempotency_deadline_seconds,
            ),
        },
    ));

    let wallets = Arc::new(PostgresWalletReadModel::new(projection_pool.clone()));
    let transactions = Arc::new(PostgresTransactionReadModel::new(projection_pool.clone()));
    let fraud_store = Arc::new(PostgresFraudStore::new(fraud_pool));
    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(DeadLetterStore::new(write_pool.clone()));

    let (shutdown, _) = broadcast::channel(1);
    let mut background = Vec::new();

    let money_topics: Vec<String> = MONEY_TOPICS.iter().map(ToString::to_string).collect();

    background.push(
        EventConsumer::new(
            ProjectionHandler::NAME,
            Subscription::new(
                format!("{}projections", config.redpanda.group_prefix),
                money_topics.clone(),
            ),
            event_bus.clone(),
            Arc::new(ProjectionHandler::new(wallets.clone(), transactions.clone())),
            dead_letters.clone(),
            shutdown.subscribe(),
        )
        .spawn(),
    );

    background.push(
        EventConsumer::new(
            FraudHandler::NAME,
            Subscription::new(
                format!("{}fraud", config.redpanda.group_prefix),
                money_topics,
            ),
            event_bus.clone(),
            Arc::new(FraudHandler::new(fraud_store, clock.clone())),
            dead_letters,
            shutdown.subscribe(),
        )
        .spawn(),
    );

    background.push(
        SagaRecovery::new(
            sagas,
            orchestrator,
            repository,
            clock,
            Duration::from_secs(config.recovery.interval_seconds),
            chrono::Duration::seconds(
                i64::try_from(config.recovery.min_age_seconds).unwrap_or(120),
            ),
            shutdown.subscribe(),
        )
        .spawn(),
    );

    let state = AppState {
        mediator,
        wallets,
        transactions,
        command_probe: Arc::new(PgPoolProbe::new(write_pool)),
        query_probe: Arc::new(PgPoolProbe::new(projection_pool)),
    };

    Ok(Application {
        state,
        shutdown,
        background,
    })
}
