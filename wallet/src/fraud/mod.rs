//! Fraud analysis: sliding-window rules, alerts and risk profiles.
//!
//! The fraud consumer subscribes to the transactional wallet topics on its
//! own durable group. For each event it records a row in the sliding
//! window, evaluates the rules in [`rules`], and for each hit writes an
//! alert and raises the wallet's risk score.
//!
//! Duplicate delivery is absorbed by the `(transaction_id, rule_id)`
//! uniqueness on alerts: a redelivered event re-evaluates the rules, hits
//! the same alerts, fails to insert them, and therefore never raises risk
//! twice.

pub mod handler;
pub mod postgres;
pub mod rules;

pub use handler::FraudHandler;
pub use postgres::PostgresFraudStore;

use crate::types::WalletId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use walletd_core::money::Money;

/// Errors from fraud storage.
#[derive(Error, Debug)]
pub enum FraudError {
    /// Storage backend error.
    #[error("Fraud storage error: {0}")]
    Storage(String),
}

/// Alert severity, each with its risk-score contribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// +5 risk.
    Low,
    /// +15 risk.
    Medium,
    /// +30 risk.
    High,
    /// +50 risk.
    Critical,
}

impl Severity {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// How much one alert of this severity raises the risk score.
    #[must_use]
    pub const fn score_delta(&self) -> u8 {
        match self {
            Self::Low => 5,
            Self::Medium => 15,
            Self::High => 30,
            Self::Critical => 50,
        }
    }
}

/// Risk level buckets over the clamped [0, 100] score.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskLevel {
    /// Score in [0, 25].
    Low,
    /// Score in (25, 50].
    Medium,
    /// Score in (50, 75].
    High,
    /// Score in (75, 100].
    Critical,
}

impl RiskLevel {
    /// Bucket a score into its level.
    #[must_use]
    pub const fn from_score(score: u8) -> Self {
        if score > 75 {
            Self::Critical
        } else if score > 50 {
            Self::High
        } else if score > 25 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// One row of the per-wallet sliding window.
#[derive(Clone, Debug, PartialEq)]
pub struct RecentEvent {
    /// The wallet the event concerns.
    pub wallet_id: WalletId,
    /// The event's routing-key tag.
    pub event_type: String,
    /// The event's amount.
    pub amount: Money,
    /// The event's transaction id.
    pub transaction_id: Uuid,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
}

/// A fraud alert.
#[derive(Clone, Debug, PartialEq)]
pub struct Alert {
    /// The wallet the alert concerns.
    pub wallet_id: WalletId,
    /// Stable rule id (`large-transaction`, …).
    pub rule_id: String,
    /// Human-readable rule name.
    pub rule_name: String,
    /// Alert severity.
    pub severity: Severity,
    /// The transaction that triggered the rule. With `rule_id`, the dedup
    /// key.
    pub transaction_id: Uuid,
    /// The triggering event's type tag.
    pub event_type: String,
    /// The triggering event's payload, for investigation.
    pub payload: serde_json::Value,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
}

/// A wallet's accumulated risk.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskProfile {
    /// The wallet.
    pub wallet_id: WalletId,
    /// Clamped score in [0, 100]; only ever moves up.
    pub risk_score: u8,
    /// Bucketed level of the score.
    pub risk_level: RiskLevel,
    /// Number of alerts that contributed.
    pub alert_count: i64,
    /// When the profile last changed.
    pub last_updated: DateTime<Utc>,
}

/// Persistence for the fraud consumer.
#[async_trait]
pub trait FraudStore: Send + Sync {
    /// Record an event into the sliding window.
    async fn record_event(&self, event: &RecentEvent) -> Result<(), FraudError>;

    /// Window rows for a wallet since the given instant, oldest first.
    async fn recent_for_wallet(
        &self,
        wallet_id: &WalletId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentEvent>, FraudError>;

    /// Insert an alert; returns `false` when `(transaction_id, rule_id)`
    /// already exists (duplicate delivery — the caller must not raise
    /// risk).
    async fn insert_alert(&self, alert: &Alert) -> Result<bool, FraudError>;

    /// Raise a wallet's risk score by `delta`, clamped at 100, bumping the
    /// alert count and recomputing the level.
    async fn raise_risk(
        &self,
        wallet_id: &WalletId,
        delta: u8,
        at: DateTime<Utc>,
    ) -> Result<RiskProfile, FraudError>;

    /// A wallet's current risk profile.
    async fn profile(&self, wallet_id: &WalletId) -> Result<Option<RiskProfile>, FraudError>;

    /// Alerts for a wallet, newest first.
    async fn alerts_for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<Alert>, FraudError>;

    /// Drop window rows older than the cutoff; returns how many went.
    /// Pruning never affects already-raised alerts.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, FraudError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_deltas_match_the_rule_table() {
        assert_eq!(Severity::Low.score_delta(), 5);
        assert_eq!(Severity::Medium.score_delta(), 15);
        assert_eq!(Severity::High.score_delta(), 30);
        assert_eq!(Severity::Critical.score_delta(), 50);
    }

    #[test]
    fn risk_level_buckets() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(26), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(51), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(75), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(76), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }
}
