//! Storage layer for mailpool.
//!
//! This crate owns the allocation and licensing state machines: every
//! multi-row mutation (claim, release, purchase, bind, payment settlement)
//! runs inside a single transaction, and the claim/purchase paths lock the
//! account row before re-checking availability so concurrent claimants
//! serialize on the row lock instead of racing the status read.
//!
//! Two backends implement the [`Store`] trait:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, using `SELECT … FOR UPDATE` row
//!   locks and atomic column increments.
//! - [`MemStore`]: in-memory tables behind one async mutex, used by tests.
//!   The mutex plays the role of the coarsest possible transaction scope.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mailpool_core::{
    Account, AccountId, AccountStatus, AccountType, FamilyUsage, KeyId, LicenseKey, Payment,
    PaymentId, ProductType, Subscription, UserId,
};

/// Filters for pool listings. Retired accounts are always excluded.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountFilter {
    /// Restrict to one allocation kind.
    pub account_type: Option<AccountType>,
    /// Restrict to one lifecycle status.
    pub status: Option<AccountStatus>,
}

/// One listing row: the account plus family occupancy when applicable.
#[derive(Debug, Clone)]
pub struct AccountListing {
    /// The account record.
    pub account: Account,
    /// Occupancy, present only for family accounts with a created group.
    pub family: Option<FamilyUsage>,
}

/// Inventory-import input for a new pool account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Allocation kind.
    pub account_type: AccountType,
    /// Primary email address.
    pub email: String,
    /// Mailbox password.
    pub password: String,
    /// TOTP secret, if any.
    pub totp_secret: Option<String>,
    /// Import batch label.
    pub source: String,
}

/// Input for a new payment order.
#[derive(Debug, Clone)]
pub struct NewPayment {
    /// Unique order number (caller-generated; regenerate and retry on
    /// [`StoreError::DuplicateOrderNo`]).
    pub order_no: String,
    /// The ordering user.
    pub user_id: UserId,
    /// Price in cents.
    pub amount_cents: i64,
    /// Product tier.
    pub product_type: ProductType,
    /// Quota the issued key will carry.
    pub quota_amount: i64,
    /// When the pending order stops being payable.
    pub expired_at: DateTime<Utc>,
}

/// The storage trait defining all allocator and license-engine operations.
///
/// Implementations must satisfy the persistence contract: multi-statement
/// transactions with rollback, row-level pessimistic locking, atomic column
/// increments, and unique constraints.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Inventory
    // =========================================================================

    /// Insert a new pool account (inventory import).
    async fn insert_account(&self, new: NewAccount) -> Result<Account>;

    /// Fetch one account by id.
    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>>;

    /// List non-retired accounts, optionally filtered, with family occupancy.
    async fn list_accounts(&self, filter: AccountFilter) -> Result<Vec<AccountListing>>;

    // =========================================================================
    // Account Allocator
    // =========================================================================

    /// Claim a temporary account for 24 hours.
    ///
    /// Locks the account row, requires `status = available`, flips it to
    /// `locked`, and opens a usage row — all in one transaction. Returns the
    /// lease expiry.
    ///
    /// # Errors
    ///
    /// `NotFound` if no temporary account has that id; `AccountUnavailable`
    /// if another claimant holds it.
    async fn claim_temporary(
        &self,
        account_id: AccountId,
        user_id: UserId,
    ) -> Result<DateTime<Utc>>;

    /// Return a claimed temporary account.
    ///
    /// Closes the caller's latest open usage row, then frees the account,
    /// in that order and in one transaction.
    ///
    /// # Errors
    ///
    /// `NotFound` if the caller has no open usage on the account.
    async fn release_temporary(&self, account_id: AccountId, user_id: UserId) -> Result<()>;

    /// Irreversibly sell an exclusive account to the caller.
    ///
    /// Same lock-then-recheck pattern as claiming; the unique constraint on
    /// the purchase record is the final guard against double-sale.
    async fn purchase_exclusive(
        &self,
        account_id: AccountId,
        user_id: UserId,
        payment_id: Option<PaymentId>,
    ) -> Result<()>;

    /// Bind a member slot in a family account's group.
    ///
    /// Lazily creates the group (capacity 5), then locks it while counting
    /// bindings, so concurrent binds cannot overrun capacity.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing family account, `FamilyGroupFull` at
    /// capacity, `AlreadyBound` for a repeat bind by the same user.
    async fn bind_family(
        &self,
        account_id: AccountId,
        user_id: UserId,
        member_email: &str,
        member_password_enc: &str,
    ) -> Result<()>;

    /// Remove the caller's binding from a family group.
    ///
    /// Deleting a non-existent binding succeeds; a missing group is
    /// `NotFound`.
    async fn unbind_family(&self, account_id: AccountId, user_id: UserId) -> Result<()>;

    /// Fetch full credentials for an exclusive account the caller bought.
    ///
    /// # Errors
    ///
    /// `NoPurchase` when the caller holds no purchase record.
    async fn exclusive_credentials(
        &self,
        account_id: AccountId,
        user_id: UserId,
    ) -> Result<Account>;

    // =========================================================================
    // License / Payment Engine
    // =========================================================================

    /// Insert a pending payment order.
    async fn create_payment(&self, new: NewPayment) -> Result<Payment>;

    /// Fetch an order scoped to its owner.
    async fn get_payment(&self, order_no: &str, user_id: UserId) -> Result<Payment>;

    /// Process a payment-platform callback.
    ///
    /// One transaction: lock the payment row, require `pending`, lazily
    /// expire overdue orders, otherwise transition to `paid` and issue
    /// exactly one active license key.
    async fn settle_payment(
        &self,
        order_no: &str,
        transaction_id: &str,
        payment_method: &str,
    ) -> Result<LicenseKey>;

    /// List the caller's keys, newest first.
    async fn list_keys(&self, user_id: UserId) -> Result<Vec<LicenseKey>>;

    /// Activate a key for the caller.
    ///
    /// First activation transfers ownership via a conditional atomic update
    /// (`… WHERE activated_at IS NULL`), so two simultaneous first
    /// activations cannot both win.
    async fn activate_key(&self, key_code: &str, user_id: UserId) -> Result<LicenseKey>;

    /// Read-only key lookup scoped to the caller.
    async fn get_key(&self, key_code: &str, user_id: UserId) -> Result<Option<LicenseKey>>;

    /// Consume quota on a key via an atomic column increment.
    ///
    /// Runs after a gated operation succeeds. If the increment reaches the
    /// total, a follow-up check flips the key to `exhausted`.
    async fn consume_quota(&self, key_id: KeyId, amount: i64) -> Result<()>;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// The caller's latest subscription, if any.
    async fn current_subscription(&self, user_id: UserId) -> Result<Option<Subscription>>;

    /// Renew (or start) the caller's subscription.
    ///
    /// Extends from `max(now, current expiry)`.
    async fn renew_subscription(
        &self,
        user_id: UserId,
        plan: &str,
        duration_days: i64,
    ) -> Result<Subscription>;
}
