//! # walletd-core
//!
//! Core abstractions for the event-sourced wallet service.
//!
//! This crate defines the types every other crate in the workspace builds
//! on: stream identity and versioning, the event model (pending, recorded,
//! and the bus wire envelope), fixed-point money, and the storage/bus traits
//! with their error taxonomies.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   Command   │
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────────┐
//! │  1. Event Log   │
//! │   (Postgres)    │◄─── Source of truth, optimistic concurrency
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  2. Event Bus   │
//! │   (Redpanda)    │◄─── At-least-once distribution
//! └────────┬────────┘
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌────────┐ ┌───────┐
//! │Project.│ │ Fraud │
//! └────────┘ └───────┘
//! ```
//!
//! Implementations live in sibling crates: `walletd-postgres` (event log,
//! dead letters), `walletd-redpanda` (bus), `walletd-testing` (in-memory
//! infrastructure for deterministic tests).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod environment;
pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod money;
pub mod stream;

pub use environment::{Clock, SystemClock};
pub use event::{Envelope, EventError, PendingEvent, RecordedEvent};
pub use event_bus::{BusConsumer, Delivery, EventBus, EventBusError, Subscription};
pub use event_store::{EventStore, EventStoreError};
pub use money::{Money, MoneyError};
pub use stream::{StreamId, Version};
