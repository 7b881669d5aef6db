//! # walletd-testing
//!
//! In-memory implementations of the core infrastructure traits, for fast,
//! deterministic tests:
//!
//! - [`InMemoryEventStore`] — the event log with real optimistic-concurrency
//!   semantics (concurrent appends at the same version race exactly as they
//!   do against Postgres)
//! - [`FailingEventStore`] — a decorator that injects append failures for a
//!   chosen aggregate, used to force saga compensation paths
//! - [`InMemoryEventBus`] — per-subscription queues with `wallet.#` pattern
//!   matching and a log of everything published, for assertions
//! - [`FixedClock`] — deterministic time
//!
//! ## Example
//!
//! ```
//! use walletd_testing::FixedClock;
//! use walletd_core::environment::Clock;
//!
//! let clock = FixedClock::default_test_time();
//! assert_eq!(clock.now(), clock.now()); // Always the same!
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event_bus;
pub mod event_store;

pub use event_bus::InMemoryEventBus;
pub use event_store::{FailingEventStore, InMemoryEventStore};

use chrono::{DateTime, Utc};
use walletd_core::environment::Clock;

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making event timestamps and fraud windows
/// reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock at the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }

    /// The default test time (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot
    /// happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn default_test_time() -> Self {
        Self::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_fixed() {
        let clock = FixedClock::default_test_time();
        assert_eq!(clock.now(), clock.now());
    }
}
