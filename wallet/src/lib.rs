//! # walletd
//!
//! Event-sourced wallet service.
//!
//! Accepts monetary commands (deposit, withdraw, transfer) and serves
//! balance/history queries. Every state change is derived from an immutable
//! append-only event log; read models and the fraud analyzer are updated
//! asynchronously from that log.
//!
//! # Write path
//!
//! ```text
//! HTTP edge
//!   └─► idempotency check-and-lock (Redis)
//!         └─► command mediator
//!               ├─► deposit/withdraw: repository → aggregate → event log
//!               └─► transfer: saga orchestrator (debit → credit, with
//!                   compensation on credit failure)
//!                     └─► event log → event bus
//!                           ├─► projection consumer (read models)
//!                           └─► fraud consumer (rules, alerts, risk)
//! ```
//!
//! Responses are synchronous from the write path; projections are eventual.
//!
//! # Module map
//!
//! - [`aggregates`] — the pure wallet state machine and its repository
//! - [`saga`] — transfer saga state, store and orchestrator
//! - [`mediator`] — command entry points inside the idempotency envelope
//! - [`idempotency`] — check-and-lock store (Redis in production)
//! - [`projections`] — wallet/transaction read models and their consumer
//! - [`fraud`] — rule evaluation, alerts and risk profiles
//! - [`runtime`] — consumer loops, dead-lettering, saga recovery
//! - [`api`], [`server`] — the HTTP edge
//! - [`mocks`] — in-memory implementations of the app-level stores

pub mod aggregates;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod events;
pub mod fraud;
pub mod idempotency;
pub mod mediator;
pub mod mocks;
pub mod projections;
pub mod runtime;
pub mod saga;
pub mod server;
pub mod types;

pub use events::WalletEvent;
pub use types::{SagaId, TransactionKind, WalletId};
