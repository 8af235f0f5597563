//! License keys, the product catalog, and the feature-permission table.
//!
//! A key is created atomically with its payment's transition to `paid` and
//! carries that payment's quota. `quota_used` only moves through the
//! post-success consumption step and never exceeds `quota_total` without the
//! status flipping to `Exhausted`.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::ids::{KeyId, PaymentId, UserId};

/// Status of a license key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Usable; quota remains.
    Active,
    /// Quota fully consumed.
    Exhausted,
    /// Administratively withdrawn.
    Revoked,
}

impl KeyStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exhausted => "exhausted",
            Self::Revoked => "revoked",
        }
    }

    /// Parse from the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "exhausted" => Some(Self::Exhausted),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// A quota-bearing license key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseKey {
    /// Database identifier.
    pub id: KeyId,
    /// Unique `XXXX-XXXX-XXXX-XXXX` code.
    pub key_code: String,
    /// Current owner. Transfers once on first activation.
    pub user_id: UserId,
    /// The payment that issued this key.
    pub payment_id: PaymentId,
    /// Product tier the key unlocks.
    pub product_type: ProductType,
    /// Total quota issued.
    pub quota_total: i64,
    /// Quota consumed so far; monotonically non-decreasing.
    pub quota_used: i64,
    /// Current status.
    pub status: KeyStatus,
    /// When the key was first activated; `None` until claimed.
    pub activated_at: Option<DateTime<Utc>>,
    /// When the key was issued.
    pub created_at: DateTime<Utc>,
}

impl LicenseKey {
    /// Quota still available on this key.
    #[must_use]
    pub fn quota_remaining(&self) -> i64 {
        (self.quota_total - self.quota_used).max(0)
    }
}

/// Product tiers sold through the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    /// Entry tier: verification only.
    Basic,
    /// Mid tier: verification, import, task management.
    Pro,
    /// Top tier: everything, including API access.
    Enterprise,
}

impl ProductType {
    /// Stable string form used in storage and request bodies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parse from the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    /// Feature tags this tier unlocks.
    #[must_use]
    pub const fn features(self) -> &'static [Feature] {
        match self {
            Self::Basic => &[Feature::EmailVerify],
            Self::Pro => &[
                Feature::EmailVerify,
                Feature::EmailImport,
                Feature::TaskManagement,
            ],
            Self::Enterprise => &[
                Feature::EmailVerify,
                Feature::EmailImport,
                Feature::TaskManagement,
                Feature::ApiAccess,
                Feature::PrioritySupport,
            ],
        }
    }

    /// Whether this tier unlocks the given feature.
    #[must_use]
    pub fn allows(self, feature: Feature) -> bool {
        self.features().contains(&feature)
    }
}

/// Feature tags gated by license keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Classify an email address.
    EmailVerify,
    /// Bulk-import email lists.
    EmailImport,
    /// Task CRUD surface.
    TaskManagement,
    /// Programmatic API access.
    ApiAccess,
    /// Priority support channel.
    PrioritySupport,
}

/// One catalog entry: a purchasable product tier.
#[derive(Debug, Clone, Serialize)]
pub struct Product {
    /// Tier identifier.
    #[serde(rename = "type")]
    pub product_type: ProductType,
    /// Display name.
    pub name: &'static str,
    /// Price in cents.
    pub price_cents: i64,
    /// Verification quota the issued key carries.
    pub quota_amount: i64,
    /// Feature tags included in this tier.
    pub features: &'static [Feature],
}

/// The static product catalog.
pub const PRODUCT_CATALOG: &[Product] = &[
    Product {
        product_type: ProductType::Basic,
        name: "Basic",
        price_cents: 1000,
        quota_amount: 100,
        features: ProductType::Basic.features(),
    },
    Product {
        product_type: ProductType::Pro,
        name: "Pro",
        price_cents: 3000,
        quota_amount: 500,
        features: ProductType::Pro.features(),
    },
    Product {
        product_type: ProductType::Enterprise,
        name: "Enterprise",
        price_cents: 5000,
        quota_amount: 1000,
        features: ProductType::Enterprise.features(),
    },
];

/// Look up a catalog entry by tier.
#[must_use]
pub fn product_for(product_type: ProductType) -> &'static Product {
    // The catalog covers every ProductType variant; the fallback is unreachable.
    PRODUCT_CATALOG
        .iter()
        .find(|p| p.product_type == product_type)
        .unwrap_or(&PRODUCT_CATALOG[0])
}

/// Generate a license key code formatted as `XXXX-XXXX-XXXX-XXXX`.
#[must_use]
pub fn generate_key_code() -> String {
    let mut raw = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut raw);
    let hex = hex::encode(raw);
    format!("{}-{}-{}-{}", &hex[0..4], &hex[4..8], &hex[8..12], &hex[12..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_code_shape() {
        let code = generate_key_code();
        assert_eq!(code.len(), 19);
        assert_eq!(code.matches('-').count(), 3);
        for part in code.split('-') {
            assert_eq!(part.len(), 4);
            assert!(part.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn catalog_covers_all_tiers() {
        for t in [ProductType::Basic, ProductType::Pro, ProductType::Enterprise] {
            assert_eq!(product_for(t).product_type, t);
        }
    }

    #[test]
    fn basic_cannot_import() {
        assert!(ProductType::Basic.allows(Feature::EmailVerify));
        assert!(!ProductType::Basic.allows(Feature::EmailImport));
        assert!(!ProductType::Basic.allows(Feature::ApiAccess));
    }

    #[test]
    fn enterprise_allows_everything() {
        for f in [
            Feature::EmailVerify,
            Feature::EmailImport,
            Feature::TaskManagement,
            Feature::ApiAccess,
            Feature::PrioritySupport,
        ] {
            assert!(ProductType::Enterprise.allows(f));
        }
    }

    #[test]
    fn quota_remaining_clamps_at_zero() {
        let key = LicenseKey {
            id: KeyId::new(1),
            key_code: "aaaa-bbbb-cccc-dddd".into(),
            user_id: UserId::new(1),
            payment_id: PaymentId::new(1),
            product_type: ProductType::Basic,
            quota_total: 10,
            quota_used: 12,
            status: KeyStatus::Exhausted,
            activated_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(key.quota_remaining(), 0);
    }
}
