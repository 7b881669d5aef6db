//! The wallet aggregate and its repository.
//!
//! The aggregate ([`wallet::Wallet`]) is pure: it folds events into a
//! balance and emits new events, with no I/O. The repository
//! ([`repository::WalletRepository`]) runs the load → fold → decide →
//! append protocol against the event store and hands committed events to
//! the bus publisher.

pub mod repository;
pub mod wallet;

pub use repository::{CommandError, Committed, WalletRepository};
pub use wallet::{DepositContext, Wallet, WalletError, WithdrawContext};
