//! Payment orders and order-number generation.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::ids::{PaymentId, UserId};
use crate::license::ProductType;

/// How long a pending order stays payable.
pub const ORDER_TTL_MINUTES: i64 = 15;

/// Status of a payment order.
///
/// `Pending` transitions to `Paid` exactly once, or to `Expired`; neither is
/// ever reopened. `Refunded` only follows `Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting the payment-platform callback.
    Pending,
    /// Settled; exactly one license key was issued with this transition.
    Paid,
    /// The 15-minute window lapsed before payment arrived.
    Expired,
    /// Refunded after settlement.
    Refunded,
}

impl PaymentStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
        }
    }

    /// Parse from the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "expired" => Some(Self::Expired),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// A payment order for a product purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Database identifier.
    pub id: PaymentId,
    /// Unique order number shown to the payment platform.
    pub order_no: String,
    /// The ordering user.
    pub user_id: UserId,
    /// Price in cents, copied from the catalog at order time.
    pub amount_cents: i64,
    /// The product being bought.
    pub product_type: ProductType,
    /// Quota the issued key will carry, copied from the catalog.
    pub quota_amount: i64,
    /// Current status.
    pub status: PaymentStatus,
    /// Payment channel reported by the callback (`alipay`, `wechat`, …).
    pub payment_method: Option<String>,
    /// Platform transaction identifier from the callback.
    pub transaction_id: Option<String>,
    /// When the callback settled the order.
    pub paid_at: Option<DateTime<Utc>>,
    /// When the pending order stops being payable.
    pub expired_at: DateTime<Utc>,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
}

/// Generate an order number: `ORD` + UTC timestamp + 8 hex characters.
///
/// Collisions are negligible but not impossible; callers must treat a
/// unique-constraint failure on insert as retryable.
#[must_use]
pub fn generate_order_no() -> String {
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!(
        "ORD{}{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        hex::encode(suffix)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_no_shape() {
        let order_no = generate_order_no();
        assert!(order_no.starts_with("ORD"));
        // ORD + 14 timestamp digits + 8 hex chars
        assert_eq!(order_no.len(), 3 + 14 + 8);
    }

    #[test]
    fn order_nos_differ() {
        assert_ne!(generate_order_no(), generate_order_no());
    }

    #[test]
    fn payment_status_roundtrip() {
        for s in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Expired,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(PaymentStatus::parse(s.as_str()), Some(s));
        }
    }
}
