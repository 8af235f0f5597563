//! Core types for the mailpool account marketplace.
//!
//! This crate provides the foundational types used throughout the platform:
//!
//! - **Identifiers**: `UserId`, `AccountId`, `PaymentId`, `KeyId`, `GroupId`
//! - **Accounts**: `Account`, `TemporaryUsage`, `ExclusivePurchase`,
//!   `FamilyGroup`, `FamilyBinding`
//! - **Payments**: `Payment`, `PaymentStatus`, order-number generation
//! - **Licensing**: `LicenseKey`, `KeyStatus`, `ProductType`, `Feature`,
//!   the static product catalog and feature-permission table
//! - **Subscriptions**: `Subscription`, renewal arithmetic
//!
//! All quantities are integers: prices in cents, quotas in call counts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod ids;
pub mod license;
pub mod payment;
pub mod subscription;

pub use account::{
    Account, AccountStatus, AccountType, ExclusivePurchase, FamilyBinding, FamilyGroup,
    FamilyUsage, TemporaryUsage, DEFAULT_FAMILY_CAPACITY, TEMPORARY_LEASE_HOURS,
};
pub use ids::{AccountId, GroupId, IdError, KeyId, PaymentId, UserId};
pub use license::{
    generate_key_code, product_for, Feature, KeyStatus, LicenseKey, Product, ProductType,
    PRODUCT_CATALOG,
};
pub use payment::{generate_order_no, Payment, PaymentStatus, ORDER_TTL_MINUTES};
pub use subscription::{
    renewed_expiry, Subscription, SubscriptionStatus, DEFAULT_PLAN, DEFAULT_RENEWAL_DAYS,
};
