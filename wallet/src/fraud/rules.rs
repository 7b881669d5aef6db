//! The fraud rules, as pure functions over the sliding window.
//!
//! | Rule id | Condition | Severity |
//! |---|---|---|
//! | `large-transaction` | amount > 10 000.00 | HIGH |
//! | `high-velocity` | more than 5 events for the wallet in 10 min | MEDIUM |
//! | `rapid-withdrawal` | a withdrawal with a deposit in the last 5 min | HIGH |
//!
//! Evaluation takes the triggering event plus the wallet's window rows (the
//! triggering event already recorded among them) and returns the hits; the
//! handler turns hits into deduplicated alerts.

use super::{RecentEvent, Severity};
use crate::events::topics;
use chrono::{DateTime, Duration, Utc};
use walletd_core::money::Money;

/// `large-transaction` fires strictly above this amount.
pub const LARGE_TRANSACTION_THRESHOLD: Money = Money::from_cents(1_000_000);

/// Window for `high-velocity`.
#[must_use]
pub fn high_velocity_window() -> Duration {
    Duration::minutes(10)
}

/// `high-velocity` fires strictly above this many events in the window.
pub const HIGH_VELOCITY_LIMIT: usize = 5;

/// Window for `rapid-withdrawal`.
#[must_use]
pub fn rapid_withdrawal_window() -> Duration {
    Duration::minutes(5)
}

/// A rule that matched an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleHit {
    /// Stable rule id.
    pub rule_id: &'static str,
    /// Human-readable rule name.
    pub rule_name: &'static str,
    /// Severity of the alert to raise.
    pub severity: Severity,
}

/// Evaluate all rules for one event.
///
/// `window` holds the wallet's recent events (including `event` itself,
/// which the handler records before evaluating) covering at least the
/// largest rule window.
#[must_use]
pub fn evaluate(event: &RecentEvent, window: &[RecentEvent], now: DateTime<Utc>) -> Vec<RuleHit> {
    let mut hits = Vec::new();

    if event.amount > LARGE_TRANSACTION_THRESHOLD {
        hits.push(RuleHit {
            rule_id: "large-transaction",
            rule_name: "Large transaction",
            severity: Severity::High,
        });
    }

    let velocity_cutoff = now - high_velocity_window();
    let recent_count = window
        .iter()
        .filter(|row| row.created_at >= velocity_cutoff)
        .count();
    if recent_count > HIGH_VELOCITY_LIMIT {
        hits.push(RuleHit {
            rule_id: "high-velocity",
            rule_name: "High velocity",
            severity: Severity::Medium,
        });
    }

    if event.event_type == topics::MONEY_WITHDRAWN {
        let deposit_cutoff = now - rapid_withdrawal_window();
        let recent_deposit = window.iter().any(|row| {
            row.event_type == topics::MONEY_DEPOSITED
                && row.created_at >= deposit_cutoff
                && row.transaction_id != event.transaction_id
        });
        if recent_deposit {
            hits.push(RuleHit {
                rule_id: "rapid-withdrawal",
                rule_name: "Rapid withdrawal after deposit",
                severity: Severity::High,
            });
        }
    }

    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WalletId;
    use uuid::Uuid;

    fn event_at(event_type: &str, amount: Money, minutes_ago: i64, now: DateTime<Utc>) -> RecentEvent {
        RecentEvent {
            wallet_id: WalletId::new("wF"),
            event_type: event_type.to_string(),
            amount,
            transaction_id: Uuid::new_v4(),
            created_at: now - Duration::minutes(minutes_ago),
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-01-01T12:00:00Z".parse().unwrap_or_default()
    }

    #[test]
    fn large_transaction_fires_strictly_above_threshold() {
        let now = now();
        let at_threshold = event_at(topics::MONEY_DEPOSITED, LARGE_TRANSACTION_THRESHOLD, 0, now);
        assert!(evaluate(&at_threshold, &[at_threshold.clone()], now).is_empty());

        let above = event_at(
            topics::MONEY_DEPOSITED,
            Money::from_cents(1_000_001),
            0,
            now,
        );
        let hits = evaluate(&above, &[above.clone()], now);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, "large-transaction");
        assert_eq!(hits[0].severity, Severity::High);
    }

    #[test]
    fn high_velocity_needs_more_than_five_events() {
        let now = now();
        let event = event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), 0, now);

        let mut window: Vec<RecentEvent> = (0..5)
            .map(|i| event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), i, now))
            .collect();
        window.push(event.clone());

        // Six events inside ten minutes: fires.
        let hits = evaluate(&event, &window, now);
        assert!(hits.iter().any(|h| h.rule_id == "high-velocity"));

        // Five events: does not fire.
        window.pop();
        let hits = evaluate(&event, &window, now);
        assert!(hits.iter().all(|h| h.rule_id != "high-velocity"));
    }

    #[test]
    fn stale_events_do_not_count_toward_velocity() {
        let now = now();
        let event = event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), 0, now);
        let window: Vec<RecentEvent> = (11..17)
            .map(|i| event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), i, now))
            .chain(std::iter::once(event.clone()))
            .collect();

        assert!(evaluate(&event, &window, now).is_empty());
    }

    #[test]
    fn rapid_withdrawal_after_recent_deposit() {
        let now = now();
        let withdrawal = event_at(topics::MONEY_WITHDRAWN, Money::from_cents(100), 0, now);
        let deposit = event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), 3, now);

        let hits = evaluate(&withdrawal, &[deposit, withdrawal.clone()], now);
        assert!(hits.iter().any(|h| h.rule_id == "rapid-withdrawal"));
    }

    #[test]
    fn withdrawal_without_recent_deposit_is_quiet() {
        let now = now();
        let withdrawal = event_at(topics::MONEY_WITHDRAWN, Money::from_cents(100), 0, now);
        let old_deposit = event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), 6, now);

        let hits = evaluate(&withdrawal, &[old_deposit, withdrawal.clone()], now);
        assert!(hits.iter().all(|h| h.rule_id != "rapid-withdrawal"));
    }

    #[test]
    fn deposit_never_triggers_rapid_withdrawal() {
        let now = now();
        let deposit = event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), 0, now);
        let earlier = event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), 1, now);

        let hits = evaluate(&deposit, &[earlier, deposit.clone()], now);
        assert!(hits.iter().all(|h| h.rule_id != "rapid-withdrawal"));
    }

    #[test]
    fn one_event_can_hit_multiple_rules() {
        let now = now();
        let withdrawal = event_at(topics::MONEY_WITHDRAWN, Money::from_cents(2_000_000), 0, now);
        let mut window: Vec<RecentEvent> = (1..=5)
            .map(|i| event_at(topics::MONEY_DEPOSITED, Money::from_cents(100), i, now))
            .collect();
        window.push(withdrawal.clone());

        let hits = evaluate(&withdrawal, &window, now);
        let ids: Vec<&str> = hits.iter().map(|h| h.rule_id).collect();
        assert!(ids.contains(&"large-transaction"));
        assert!(ids.contains(&"high-velocity"));
        assert!(ids.contains(&"rapid-withdrawal"));
    }
}
