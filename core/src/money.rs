//! Fixed-point monetary amounts.
//!
//! Balances and transfer amounts are ledger quantities with exactly two
//! decimal places. [`Money`] stores whole cents in a `u64`, so arithmetic is
//! exact and a balance can never drift through float rounding. At the JSON
//! boundary (HTTP bodies, bus payloads) amounts appear as plain decimal
//! numbers (`100`, `42.5`), which is what the serde implementations below
//! translate to and from.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Errors constructing a [`Money`] value from external input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// The input was negative, NaN or infinite.
    #[error("Amount must be a finite, non-negative number")]
    NotRepresentable,

    /// The input exceeds the representable range.
    #[error("Amount exceeds the supported maximum")]
    Overflow,
}

/// A monetary amount in whole cents.
///
/// `Money` is always non-negative; subtraction that would underflow returns
/// `None` instead, which is how the aggregate detects insufficient funds.
///
/// # Examples
///
/// ```
/// use walletd_core::money::Money;
///
/// let balance = Money::from_cents(10_000); // 100.00
/// let debit = Money::from_cents(2_550); // 25.50
///
/// assert_eq!(balance.checked_sub(debit), Some(Money::from_cents(7_450)));
/// assert_eq!(debit.checked_sub(balance), None);
/// assert_eq!(format!("{balance}"), "100.00");
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from a decimal amount (e.g. `42.5` → 4250
    /// cents), rounding to the nearest cent.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::NotRepresentable`] for negative, NaN or
    /// infinite inputs and [`MoneyError::Overflow`] for amounts beyond the
    /// `u64` cent range.
    pub fn from_decimal(amount: f64) -> Result<Self, MoneyError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(MoneyError::NotRepresentable);
        }
        let cents = (amount * 100.0).round();
        // f64 loses integer precision past 2^53; amounts that large are not
        // meaningful ledger values anyway.
        if cents >= 9_007_199_254_740_992.0 {
            return Err(MoneyError::Overflow);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cents = cents as u64;
        Ok(Self(cents))
    }

    /// Returns the amount in cents.
    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Returns the amount as a decimal number (for JSON payloads).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Ledger amounts stay far below 2^52 cents
    pub fn as_decimal(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Checks if the amount is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two amounts, returning `None` if the result would be
    /// negative.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_decimal())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amount = f64::deserialize(deserializer)?;
        Self::from_decimal(amount).map_err(D::Error::custom)
    }
}
