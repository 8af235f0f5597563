//! Subscription records and renewal arithmetic.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Plan name used when an activation request omits one.
pub const DEFAULT_PLAN: &str = "monthly";

/// Renewal length in days when an activation request omits one.
pub const DEFAULT_RENEWAL_DAYS: i64 = 30;

/// Status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Counts toward entitlement checks until `expires_at`.
    Active,
    /// Cancelled by the user; no longer extendable.
    Cancelled,
}

impl SubscriptionStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A user's subscription to the account-pool surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// The subscribed user.
    pub user_id: UserId,
    /// Plan label (free-form, defaults to `monthly`).
    pub plan: String,
    /// When entitlement lapses.
    pub expires_at: DateTime<Utc>,
    /// Current status.
    pub status: SubscriptionStatus,
}

impl Subscription {
    /// Whether the subscription entitles the user right now.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_at > now
    }
}

/// Compute the new expiry for a renewal.
///
/// Extends from `max(now, current expiry)` so renewing early stacks the
/// remaining time instead of discarding it.
#[must_use]
pub fn renewed_expiry(
    now: DateTime<Utc>,
    current: Option<DateTime<Utc>>,
    duration_days: i64,
) -> DateTime<Utc> {
    let base = match current {
        Some(expiry) if expiry > now => expiry,
        _ => now,
    };
    base + Duration::days(duration_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_extends_future_expiry() {
        let now = Utc::now();
        let expiry = now + Duration::days(10);
        let renewed = renewed_expiry(now, Some(expiry), 30);
        assert_eq!(renewed, expiry + Duration::days(30));
    }

    #[test]
    fn renewal_restarts_from_now_when_lapsed() {
        let now = Utc::now();
        let expiry = now - Duration::days(3);
        let renewed = renewed_expiry(now, Some(expiry), 30);
        assert_eq!(renewed, now + Duration::days(30));
    }

    #[test]
    fn renewal_without_prior_subscription() {
        let now = Utc::now();
        assert_eq!(renewed_expiry(now, None, 7), now + Duration::days(7));
    }

    #[test]
    fn active_check_respects_status_and_expiry() {
        let now = Utc::now();
        let sub = Subscription {
            user_id: UserId::new(1),
            plan: DEFAULT_PLAN.into(),
            expires_at: now + Duration::days(1),
            status: SubscriptionStatus::Active,
        };
        assert!(sub.is_active_at(now));

        let lapsed = Subscription {
            expires_at: now - Duration::seconds(1),
            ..sub.clone()
        };
        assert!(!lapsed.is_active_at(now));

        let cancelled = Subscription {
            status: SubscriptionStatus::Cancelled,
            ..sub
        };
        assert!(!cancelled.is_active_at(now));
    }
}
