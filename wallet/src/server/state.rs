//! Shared application state for HTTP handlers.

use crate::mediator::CommandMediator;
use crate::projections::{TransactionReadModel, WalletReadModel};
use crate::server::health::HealthProbe;
use std::sync::Arc;

/// Everything a handler needs, injected once at startup.
///
/// All collaborators are trait objects, so tests assemble the same state
/// over the in-memory implementations.
#[derive(Clone)]
pub struct AppState {
    /// Entry point for mutating commands.
    pub mediator: Arc<CommandMediator>,
    /// Wallet projection (balance queries).
    pub wallets: Arc<dyn WalletReadModel>,
    /// Transaction projection (history queries).
    pub transactions: Arc<dyn TransactionReadModel>,
    /// Health of the command side (event store).
    pub command_probe: Arc<dyn HealthProbe>,
    /// Health of the query side (projection store).
    pub query_probe: Arc<dyn HealthProbe>,
}
