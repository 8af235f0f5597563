//! Pool-account types and their allocation sub-records.
//!
//! Every account in the pool carries one set of credentials and exactly one
//! kind of allocation record depending on its type:
//!
//! - `temporary` accounts get an open [`TemporaryUsage`] row while claimed
//! - `exclusive` accounts get at most one [`ExclusivePurchase`] row, ever
//! - `family` accounts get a lazily created [`FamilyGroup`] with member
//!   [`FamilyBinding`] rows
//!
//! Status and the allocation sub-record are only ever mutated together inside
//! a single storage transaction; the allocator in the store layer owns those
//! transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, GroupId, PaymentId, UserId};

/// Default member capacity for a family group.
pub const DEFAULT_FAMILY_CAPACITY: i32 = 5;

/// How long a temporary claim lasts before it expires.
pub const TEMPORARY_LEASE_HOURS: i64 = 24;

/// The kind of a pool account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Claimable for a 24-hour lease, then returned to the pool.
    Temporary,
    /// Sold once, irreversibly, to a single buyer.
    Exclusive,
    /// Shared by up to `capacity` member bindings.
    Family,
}

impl AccountType {
    /// Stable string form used in storage and query parameters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::Exclusive => "exclusive",
            Self::Family => "family",
        }
    }

    /// Parse from the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temporary" => Some(Self::Temporary),
            "exclusive" => Some(Self::Exclusive),
            "family" => Some(Self::Family),
            _ => None,
        }
    }
}

/// Lifecycle status of a pool account.
///
/// `Retired` is terminal and excluded from listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// In the pool, claimable or purchasable.
    Available,
    /// Held by an open temporary usage.
    Locked,
    /// Sold via an exclusive purchase.
    Sold,
    /// Removed from circulation; never listed.
    Retired,
}

impl AccountStatus {
    /// Stable string form used in storage and query parameters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Locked => "locked",
            Self::Sold => "sold",
            Self::Retired => "retired",
        }
    }

    /// Parse from the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "locked" => Some(Self::Locked),
            "sold" => Some(Self::Sold),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

/// A pool account: one email credential set plus allocation state.
///
/// Credentials (`password`, `totp_secret`) are never serialized into listing
/// responses; the service exposes them only through the ownership-checked
/// credentials endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Database identifier.
    pub id: AccountId,
    /// Allocation kind.
    pub account_type: AccountType,
    /// Primary email address (the visible identity of the account).
    pub email: String,
    /// Mailbox password.
    pub password: String,
    /// TOTP secret for two-factor login, if the mailbox has one.
    pub totp_secret: Option<String>,
    /// Current lifecycle status.
    pub status: AccountStatus,
    /// Where the inventory came from (import batch label).
    pub source: String,
    /// When the account entered the pool.
    pub created_at: DateTime<Utc>,
}

/// One temporary lease on an account.
///
/// At most one open row (`returned_at = None`) exists per account; that row
/// is created when the claim commits and closed when the release commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryUsage {
    /// The claimed account.
    pub account_id: AccountId,
    /// The claimant.
    pub user_id: UserId,
    /// When the claim was taken.
    pub started_at: DateTime<Utc>,
    /// When the lease lapses.
    pub expires_at: DateTime<Utc>,
    /// When the account was returned; `None` while the lease is open.
    pub returned_at: Option<DateTime<Utc>>,
}

/// The irreversible sale record for an exclusive account.
///
/// Uniqueness on `account_id` is the final safety net against double-sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusivePurchase {
    /// The sold account (unique).
    pub account_id: AccountId,
    /// The buyer.
    pub user_id: UserId,
    /// The payment that funded the sale, when known.
    pub payment_id: Option<PaymentId>,
    /// When the sale committed.
    pub purchased_at: DateTime<Utc>,
}

/// Shared-capacity group for a family account, created lazily on first bind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyGroup {
    /// Database identifier.
    pub id: GroupId,
    /// The family account this group belongs to (unique).
    pub account_id: AccountId,
    /// Maximum number of live bindings.
    pub capacity: i32,
}

/// One member slot in a family group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyBinding {
    /// The group this binding belongs to.
    pub family_group_id: GroupId,
    /// The bound user (one binding per user per group).
    pub user_id: UserId,
    /// The member email joined to the family.
    pub member_email: String,
    /// The member password, encrypted at rest by the caller.
    pub member_password_enc: String,
    /// When the binding was created.
    pub bound_at: DateTime<Utc>,
}

/// Occupancy summary attached to family accounts in listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FamilyUsage {
    /// Maximum member slots.
    pub capacity: i32,
    /// Slots currently bound.
    pub used: i32,
}
