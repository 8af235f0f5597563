//! PostgreSQL storage implementation.
//!
//! Every allocator mutation follows the same shape: begin a transaction,
//! `SELECT … FOR UPDATE` the row that serializes the operation, re-check the
//! precondition under the lock, write, commit. Any error before commit drops
//! the transaction and rolls everything back.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use mailpool_core::{
    generate_key_code, renewed_expiry, Account, AccountId, AccountStatus, AccountType,
    FamilyUsage, KeyId, KeyStatus, LicenseKey, Payment, PaymentId, PaymentStatus, ProductType,
    Subscription, SubscriptionStatus, UserId, TEMPORARY_LEASE_HOURS,
};

use crate::error::{Result, StoreError};
use crate::schema::SCHEMA;
use crate::{AccountFilter, AccountListing, NewAccount, NewPayment, Store};

/// PostgreSQL-backed storage implementation.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL with a small default pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema idempotently.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("database schema applied");
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn parse_account_type(s: &str) -> Result<AccountType> {
    AccountType::parse(s).ok_or_else(|| StoreError::Database(format!("bad account type: {s}")))
}

fn parse_account_status(s: &str) -> Result<AccountStatus> {
    AccountStatus::parse(s).ok_or_else(|| StoreError::Database(format!("bad account status: {s}")))
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let type_str: String = row.try_get("type")?;
    let status_str: String = row.try_get("status")?;
    Ok(Account {
        id: AccountId::new(row.try_get("id")?),
        account_type: parse_account_type(&type_str)?,
        email: row.try_get("email")?,
        password: row.try_get("password")?,
        totp_secret: row.try_get("totp_secret")?,
        status: parse_account_status(&status_str)?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let product_str: String = row.try_get("product_type")?;
    let status_str: String = row.try_get("status")?;
    Ok(Payment {
        id: PaymentId::new(row.try_get("id")?),
        order_no: row.try_get("order_no")?,
        user_id: UserId::new(row.try_get("user_id")?),
        amount_cents: row.try_get("amount_cents")?,
        product_type: ProductType::parse(&product_str)
            .ok_or_else(|| StoreError::Database(format!("bad product type: {product_str}")))?,
        quota_amount: row.try_get("quota_amount")?,
        status: PaymentStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Database(format!("bad payment status: {status_str}")))?,
        payment_method: row.try_get("payment_method")?,
        transaction_id: row.try_get("transaction_id")?,
        paid_at: row.try_get("paid_at")?,
        expired_at: row.try_get("expired_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn key_from_row(row: &PgRow) -> Result<LicenseKey> {
    let product_str: String = row.try_get("product_type")?;
    let status_str: String = row.try_get("status")?;
    Ok(LicenseKey {
        id: KeyId::new(row.try_get("id")?),
        key_code: row.try_get("key_code")?,
        user_id: UserId::new(row.try_get("user_id")?),
        payment_id: PaymentId::new(row.try_get("payment_id")?),
        product_type: ProductType::parse(&product_str)
            .ok_or_else(|| StoreError::Database(format!("bad product type: {product_str}")))?,
        quota_total: row.try_get("quota_total")?,
        quota_used: row.try_get("quota_used")?,
        status: KeyStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Database(format!("bad key status: {status_str}")))?,
        activated_at: row.try_get("activated_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    let status_str: String = row.try_get("status")?;
    Ok(Subscription {
        user_id: UserId::new(row.try_get("user_id")?),
        plan: row.try_get("plan")?,
        expires_at: row.try_get("expires_at")?,
        status: SubscriptionStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Database(format!("bad subscription status: {status_str}")))?,
    })
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Inventory
    // =========================================================================

    async fn insert_account(&self, new: NewAccount) -> Result<Account> {
        let row = sqlx::query(
            "INSERT INTO accounts (type, email, password, totp_secret, status, source) \
             VALUES ($1, $2, $3, $4, 'available', $5) \
             RETURNING id, type, email, password, totp_secret, status, source, created_at",
        )
        .bind(new.account_type.as_str())
        .bind(&new.email)
        .bind(&new.password)
        .bind(new.totp_secret.as_deref())
        .bind(&new.source)
        .fetch_one(&self.pool)
        .await?;

        account_from_row(&row)
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        sqlx::query(
            "SELECT id, type, email, password, totp_secret, status, source, created_at \
             FROM accounts WHERE id = $1",
        )
        .bind(account_id.as_i64())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(account_from_row)
        .transpose()
    }

    async fn list_accounts(&self, filter: AccountFilter) -> Result<Vec<AccountListing>> {
        let rows = sqlx::query(
            "SELECT a.id, a.type, a.email, a.password, a.totp_secret, a.status, a.source, \
                    a.created_at, g.capacity, \
                    (SELECT count(*) FROM family_bindings b WHERE b.family_group_id = g.id) AS used \
             FROM accounts a \
             LEFT JOIN family_groups g ON g.account_id = a.id \
             WHERE a.status <> 'retired' \
               AND ($1::text IS NULL OR a.type = $1) \
               AND ($2::text IS NULL OR a.status = $2) \
             ORDER BY a.id ASC",
        )
        .bind(filter.account_type.map(AccountType::as_str))
        .bind(filter.status.map(AccountStatus::as_str))
        .fetch_all(&self.pool)
        .await?;

        let mut listings = Vec::with_capacity(rows.len());
        for row in &rows {
            let account = account_from_row(row)?;
            let capacity: Option<i32> = row.try_get("capacity")?;
            let family = match (account.account_type, capacity) {
                (AccountType::Family, Some(capacity)) => {
                    let used: i64 = row.try_get::<Option<i64>, _>("used")?.unwrap_or(0);
                    Some(FamilyUsage {
                        capacity,
                        used: i32::try_from(used).unwrap_or(i32::MAX),
                    })
                }
                _ => None,
            };
            listings.push(AccountListing { account, family });
        }
        Ok(listings)
    }

    // =========================================================================
    // Account Allocator
    // =========================================================================

    async fn claim_temporary(
        &self,
        account_id: AccountId,
        user_id: UserId,
    ) -> Result<DateTime<Utc>> {
        let mut tx = self.pool.begin().await?;

        // The row lock serializes concurrent claimants; only the first one
        // through still sees status = 'available'.
        let row = sqlx::query(
            "SELECT status FROM accounts WHERE id = $1 AND type = 'temporary' FOR UPDATE",
        )
        .bind(account_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "account",
            id: account_id.to_string(),
        })?;

        let status: String = row.try_get("status")?;
        if parse_account_status(&status)? != AccountStatus::Available {
            return Err(StoreError::AccountUnavailable);
        }

        sqlx::query("UPDATE accounts SET status = 'locked' WHERE id = $1")
            .bind(account_id.as_i64())
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        let expires_at = now + Duration::hours(TEMPORARY_LEASE_HOURS);
        sqlx::query(
            "INSERT INTO temporary_usages (account_id, user_id, started_at, expires_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(account_id.as_i64())
        .bind(user_id.as_i64())
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(%account_id, %user_id, %expires_at, "temporary account claimed");
        Ok(expires_at)
    }

    async fn release_temporary(&self, account_id: AccountId, user_id: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id FROM temporary_usages \
             WHERE account_id = $1 AND user_id = $2 AND returned_at IS NULL \
             ORDER BY started_at DESC LIMIT 1 FOR UPDATE",
        )
        .bind(account_id.as_i64())
        .bind(user_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "usage",
            id: account_id.to_string(),
        })?;

        let usage_id: i64 = row.try_get("id")?;
        sqlx::query("UPDATE temporary_usages SET returned_at = now() WHERE id = $1")
            .bind(usage_id)
            .execute(&mut *tx)
            .await?;

        // Usage closure comes first; freeing the status is conditional on the
        // account still being a locked temporary, so a retired or repurposed
        // account is never flipped back to available.
        sqlx::query(
            "UPDATE accounts SET status = 'available' \
             WHERE id = $1 AND type = 'temporary' AND status = 'locked'",
        )
        .bind(account_id.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(%account_id, %user_id, "temporary account released");
        Ok(())
    }

    async fn purchase_exclusive(
        &self,
        account_id: AccountId,
        user_id: UserId,
        payment_id: Option<PaymentId>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT status FROM accounts WHERE id = $1 AND type = 'exclusive' FOR UPDATE",
        )
        .bind(account_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "account",
            id: account_id.to_string(),
        })?;

        let status: String = row.try_get("status")?;
        if parse_account_status(&status)? != AccountStatus::Available {
            return Err(StoreError::AccountUnavailable);
        }

        sqlx::query("UPDATE accounts SET status = 'sold' WHERE id = $1")
            .bind(account_id.as_i64())
            .execute(&mut *tx)
            .await?;

        let insert = sqlx::query(
            "INSERT INTO exclusive_purchases (account_id, user_id, payment_id, purchased_at) \
             VALUES ($1, $2, $3, now())",
        )
        .bind(account_id.as_i64())
        .bind(user_id.as_i64())
        .bind(payment_id.map(PaymentId::as_i64))
        .execute(&mut *tx)
        .await;

        if let Err(err) = insert {
            // The unique constraint on account_id is the last guard against
            // double-sale.
            if is_unique_violation(&err) {
                return Err(StoreError::AccountUnavailable);
            }
            return Err(err.into());
        }

        tx.commit().await?;

        tracing::info!(%account_id, %user_id, "exclusive account sold");
        Ok(())
    }

    async fn bind_family(
        &self,
        account_id: AccountId,
        user_id: UserId,
        member_email: &str,
        member_password_enc: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM accounts WHERE id = $1 AND type = 'family'")
            .bind(account_id.as_i64())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            });
        }

        sqlx::query(
            "INSERT INTO family_groups (account_id, capacity) VALUES ($1, $2) \
             ON CONFLICT (account_id) DO NOTHING",
        )
        .bind(account_id.as_i64())
        .bind(mailpool_core::DEFAULT_FAMILY_CAPACITY)
        .execute(&mut *tx)
        .await?;

        // Locking the group row serializes the count-check-and-insert, so
        // concurrent binds cannot overrun capacity.
        let group = sqlx::query(
            "SELECT id, capacity FROM family_groups WHERE account_id = $1 FOR UPDATE",
        )
        .bind(account_id.as_i64())
        .fetch_one(&mut *tx)
        .await?;
        let group_id: i64 = group.try_get("id")?;
        let capacity: i32 = group.try_get("capacity")?;

        let used: i64 = sqlx::query("SELECT count(*) AS n FROM family_bindings WHERE family_group_id = $1")
            .bind(group_id)
            .fetch_one(&mut *tx)
            .await?
            .try_get("n")?;
        if used >= i64::from(capacity) {
            return Err(StoreError::FamilyGroupFull);
        }

        let insert = sqlx::query(
            "INSERT INTO family_bindings \
             (family_group_id, user_id, member_email, member_password_enc) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(group_id)
        .bind(user_id.as_i64())
        .bind(member_email)
        .bind(member_password_enc)
        .execute(&mut *tx)
        .await;

        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(StoreError::AlreadyBound);
            }
            return Err(err.into());
        }

        tx.commit().await?;

        tracing::info!(%account_id, %user_id, "family binding created");
        Ok(())
    }

    async fn unbind_family(&self, account_id: AccountId, user_id: UserId) -> Result<()> {
        let group = sqlx::query("SELECT id FROM family_groups WHERE account_id = $1")
            .bind(account_id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "family group",
                id: account_id.to_string(),
            })?;
        let group_id: i64 = group.try_get("id")?;

        // Deleting zero rows is still success.
        sqlx::query("DELETE FROM family_bindings WHERE family_group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await?;

        tracing::info!(%account_id, %user_id, "family binding removed");
        Ok(())
    }

    async fn exclusive_credentials(
        &self,
        account_id: AccountId,
        user_id: UserId,
    ) -> Result<Account> {
        let purchase = sqlx::query(
            "SELECT id FROM exclusive_purchases WHERE account_id = $1 AND user_id = $2",
        )
        .bind(account_id.as_i64())
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        if purchase.is_none() {
            return Err(StoreError::NoPurchase);
        }

        let row = sqlx::query(
            "SELECT id, type, email, password, totp_secret, status, source, created_at \
             FROM accounts WHERE id = $1 AND type = 'exclusive'",
        )
        .bind(account_id.as_i64())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "account",
            id: account_id.to_string(),
        })?;

        account_from_row(&row)
    }

    // =========================================================================
    // License / Payment Engine
    // =========================================================================

    async fn create_payment(&self, new: NewPayment) -> Result<Payment> {
        let result = sqlx::query(
            "INSERT INTO payments \
             (order_no, user_id, amount_cents, product_type, quota_amount, status, expired_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6) \
             RETURNING id, order_no, user_id, amount_cents, product_type, quota_amount, status, \
                       payment_method, transaction_id, paid_at, expired_at, created_at",
        )
        .bind(&new.order_no)
        .bind(new.user_id.as_i64())
        .bind(new.amount_cents)
        .bind(new.product_type.as_str())
        .bind(new.quota_amount)
        .bind(new.expired_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => payment_from_row(&row),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateOrderNo {
                order_no: new.order_no,
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_payment(&self, order_no: &str, user_id: UserId) -> Result<Payment> {
        let row = sqlx::query(
            "SELECT id, order_no, user_id, amount_cents, product_type, quota_amount, status, \
                    payment_method, transaction_id, paid_at, expired_at, created_at \
             FROM payments WHERE order_no = $1 AND user_id = $2",
        )
        .bind(order_no)
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "order",
            id: order_no.to_string(),
        })?;

        payment_from_row(&row)
    }

    async fn settle_payment(
        &self,
        order_no: &str,
        transaction_id: &str,
        payment_method: &str,
    ) -> Result<LicenseKey> {
        let mut tx = self.pool.begin().await?;

        // Locking the payment row makes a duplicate callback wait here and
        // then fail the pending check.
        let row = sqlx::query(
            "SELECT id, order_no, user_id, amount_cents, product_type, quota_amount, status, \
                    payment_method, transaction_id, paid_at, expired_at, created_at \
             FROM payments WHERE order_no = $1 FOR UPDATE",
        )
        .bind(order_no)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "order",
            id: order_no.to_string(),
        })?;
        let payment = payment_from_row(&row)?;

        if payment.status != PaymentStatus::Pending {
            return Err(StoreError::InvalidPaymentState {
                status: payment.status.as_str().to_string(),
            });
        }

        let now = Utc::now();
        if now > payment.expired_at {
            // Lazy expiry: the overdue order is finalized here, on its own
            // commit, and no key is issued.
            sqlx::query("UPDATE payments SET status = 'expired' WHERE id = $1")
                .bind(payment.id.as_i64())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Err(StoreError::OrderExpired);
        }

        sqlx::query(
            "UPDATE payments SET status = 'paid', payment_method = $2, transaction_id = $3, \
             paid_at = $4 WHERE id = $1",
        )
        .bind(payment.id.as_i64())
        .bind(payment_method)
        .bind(transaction_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // The key starts unactivated; ownership is settled later by the
        // first activation.
        let key_row = sqlx::query(
            "INSERT INTO license_keys \
             (key_code, user_id, payment_id, product_type, quota_total, quota_used, status) \
             VALUES ($1, $2, $3, $4, $5, 0, 'active') \
             RETURNING id, key_code, user_id, payment_id, product_type, quota_total, quota_used, \
                       status, activated_at, created_at",
        )
        .bind(generate_key_code())
        .bind(payment.user_id.as_i64())
        .bind(payment.id.as_i64())
        .bind(payment.product_type.as_str())
        .bind(payment.quota_amount)
        .fetch_one(&mut *tx)
        .await?;
        let key = key_from_row(&key_row)?;

        tx.commit().await?;

        tracing::info!(order_no, user_id = %payment.user_id, key_id = %key.id, "payment settled, key issued");
        Ok(key)
    }

    async fn list_keys(&self, user_id: UserId) -> Result<Vec<LicenseKey>> {
        let rows = sqlx::query(
            "SELECT id, key_code, user_id, payment_id, product_type, quota_total, quota_used, \
                    status, activated_at, created_at \
             FROM license_keys WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(key_from_row).collect()
    }

    async fn activate_key(&self, key_code: &str, user_id: UserId) -> Result<LicenseKey> {
        let row = sqlx::query(
            "SELECT id, key_code, user_id, payment_id, product_type, quota_total, quota_used, \
                    status, activated_at, created_at \
             FROM license_keys WHERE key_code = $1",
        )
        .bind(key_code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "key",
            id: key_code.to_string(),
        })?;
        let key = key_from_row(&row)?;

        match key.status {
            KeyStatus::Revoked => return Err(StoreError::KeyRevoked),
            KeyStatus::Exhausted => return Err(StoreError::KeyExhausted),
            KeyStatus::Active => {}
        }

        if key.activated_at.is_some() {
            if key.user_id != user_id {
                return Err(StoreError::ActivatedByOther);
            }
            return Ok(key);
        }

        // Conditional atomic update: of two simultaneous first activations,
        // only one matches activated_at IS NULL.
        let claimed = sqlx::query(
            "UPDATE license_keys SET user_id = $2, activated_at = now() \
             WHERE key_code = $1 AND activated_at IS NULL \
             RETURNING id, key_code, user_id, payment_id, product_type, quota_total, quota_used, \
                       status, activated_at, created_at",
        )
        .bind(key_code)
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            let key = key_from_row(&row)?;
            tracing::info!(key_id = %key.id, %user_id, "license key activated");
            return Ok(key);
        }

        // Lost the race: someone else activated between the read and the
        // update.
        let current = self
            .get_key_unscoped(key_code)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "key",
                id: key_code.to_string(),
            })?;
        if current.user_id == user_id {
            Ok(current)
        } else {
            Err(StoreError::ActivatedByOther)
        }
    }

    async fn get_key(&self, key_code: &str, user_id: UserId) -> Result<Option<LicenseKey>> {
        sqlx::query(
            "SELECT id, key_code, user_id, payment_id, product_type, quota_total, quota_used, \
                    status, activated_at, created_at \
             FROM license_keys WHERE key_code = $1 AND user_id = $2",
        )
        .bind(key_code)
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(key_from_row)
        .transpose()
    }

    async fn consume_quota(&self, key_id: KeyId, amount: i64) -> Result<()> {
        // Single atomic arithmetic update; concurrent consumers on the same
        // key never lose increments.
        let row = sqlx::query(
            "UPDATE license_keys SET quota_used = quota_used + $2 WHERE id = $1 \
             RETURNING quota_used, quota_total",
        )
        .bind(key_id.as_i64())
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "key",
            id: key_id.to_string(),
        })?;

        let quota_used: i64 = row.try_get("quota_used")?;
        let quota_total: i64 = row.try_get("quota_total")?;
        if quota_used >= quota_total {
            sqlx::query(
                "UPDATE license_keys SET status = 'exhausted' WHERE id = $1 AND status = 'active'",
            )
            .bind(key_id.as_i64())
            .execute(&self.pool)
            .await?;
            tracing::info!(%key_id, quota_used, quota_total, "license key exhausted");
        }

        Ok(())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn current_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        sqlx::query(
            "SELECT user_id, plan, expires_at, status FROM subscriptions \
             WHERE user_id = $1 ORDER BY expires_at DESC LIMIT 1",
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(subscription_from_row)
        .transpose()
    }

    async fn renew_subscription(
        &self,
        user_id: UserId,
        plan: &str,
        duration_days: i64,
    ) -> Result<Subscription> {
        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        let current = sqlx::query(
            "SELECT id, expires_at FROM subscriptions \
             WHERE user_id = $1 AND status = 'active' \
             ORDER BY expires_at DESC LIMIT 1 FOR UPDATE",
        )
        .bind(user_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let subscription = if let Some(row) = current {
            let sub_id: i64 = row.try_get("id")?;
            let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
            let new_expiry = renewed_expiry(now, Some(expires_at), duration_days);
            sqlx::query("UPDATE subscriptions SET plan = $2, expires_at = $3 WHERE id = $1")
                .bind(sub_id)
                .bind(plan)
                .bind(new_expiry)
                .execute(&mut *tx)
                .await?;
            Subscription {
                user_id,
                plan: plan.to_string(),
                expires_at: new_expiry,
                status: SubscriptionStatus::Active,
            }
        } else {
            let new_expiry = renewed_expiry(now, None, duration_days);
            sqlx::query(
                "INSERT INTO subscriptions (user_id, plan, expires_at, status) \
                 VALUES ($1, $2, $3, 'active')",
            )
            .bind(user_id.as_i64())
            .bind(plan)
            .bind(new_expiry)
            .execute(&mut *tx)
            .await?;
            Subscription {
                user_id,
                plan: plan.to_string(),
                expires_at: new_expiry,
                status: SubscriptionStatus::Active,
            }
        };

        tx.commit().await?;

        tracing::info!(%user_id, plan, expires_at = %subscription.expires_at, "subscription renewed");
        Ok(subscription)
    }
}

impl PgStore {
    /// Key lookup by code alone, used to resolve activation races.
    async fn get_key_unscoped(&self, key_code: &str) -> Result<Option<LicenseKey>> {
        sqlx::query(
            "SELECT id, key_code, user_id, payment_id, product_type, quota_total, quota_used, \
                    status, activated_at, created_at \
             FROM license_keys WHERE key_code = $1",
        )
        .bind(key_code)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(key_from_row)
        .transpose()
    }
}
