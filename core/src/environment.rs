//! Injectable environment dependencies.
//!
//! Components that need the current time take an `Arc<dyn Clock>` instead
//! of calling `Utc::now()` directly, so event timestamps and fraud windows
//! are deterministic under test (`FixedClock` in `walletd-testing`).

use chrono::{DateTime, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// The current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
