//! In-memory storage implementation.
//!
//! All tables live behind a single async mutex, which stands in for the
//! coarsest possible transaction scope: every [`Store`] method takes the lock
//! once, so each operation is atomic with respect to every other. Used by the
//! service's HTTP tests and anywhere a throwaway backend is convenient.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use mailpool_core::{
    generate_key_code, renewed_expiry, Account, AccountId, AccountStatus, AccountType,
    ExclusivePurchase, FamilyBinding, FamilyGroup, FamilyUsage, GroupId, KeyId, KeyStatus,
    LicenseKey, Payment, PaymentId, PaymentStatus, Subscription, SubscriptionStatus, UserId,
    DEFAULT_FAMILY_CAPACITY, TEMPORARY_LEASE_HOURS,
};

use crate::error::{Result, StoreError};
use crate::{AccountFilter, AccountListing, NewAccount, NewPayment, Store};

#[derive(Default)]
struct State {
    accounts: BTreeMap<i64, Account>,
    usages: Vec<mailpool_core::TemporaryUsage>,
    purchases: Vec<ExclusivePurchase>,
    groups: BTreeMap<i64, FamilyGroup>,
    bindings: Vec<FamilyBinding>,
    payments: BTreeMap<i64, Payment>,
    keys: BTreeMap<i64, LicenseKey>,
    subscriptions: Vec<Subscription>,
    /// When set, the next usage insert inside `claim_temporary` fails after
    /// the status flip, exercising the rollback path.
    #[cfg(test)]
    fail_next_usage_insert: bool,
}

fn next_id<V>(table: &BTreeMap<i64, V>) -> i64 {
    table.keys().next_back().copied().unwrap_or(0) + 1
}

/// In-memory [`Store`] backend.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next `claim_temporary` to fail mid-transaction.
    #[cfg(test)]
    async fn fail_next_usage_insert(&self) {
        self.state.lock().await.fail_next_usage_insert = true;
    }
}

#[async_trait]
impl Store for MemStore {
    // =========================================================================
    // Inventory
    // =========================================================================

    async fn insert_account(&self, new: NewAccount) -> Result<Account> {
        let mut state = self.state.lock().await;
        if state.accounts.values().any(|a| a.email == new.email) {
            return Err(StoreError::Database(format!(
                "duplicate account email: {}",
                new.email
            )));
        }
        let id = next_id(&state.accounts);
        let account = Account {
            id: AccountId::new(id),
            account_type: new.account_type,
            email: new.email,
            password: new.password,
            totp_secret: new.totp_secret,
            status: AccountStatus::Available,
            source: new.source,
            created_at: Utc::now(),
        };
        state.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&account_id.as_i64()).cloned())
    }

    async fn list_accounts(&self, filter: AccountFilter) -> Result<Vec<AccountListing>> {
        let state = self.state.lock().await;
        let mut listings = Vec::new();
        for account in state.accounts.values() {
            if account.status == AccountStatus::Retired {
                continue;
            }
            if filter.account_type.is_some_and(|t| t != account.account_type) {
                continue;
            }
            if filter.status.is_some_and(|s| s != account.status) {
                continue;
            }
            let family = if account.account_type == AccountType::Family {
                state
                    .groups
                    .values()
                    .find(|g| g.account_id == account.id)
                    .map(|g| FamilyUsage {
                        capacity: g.capacity,
                        used: i32::try_from(
                            state
                                .bindings
                                .iter()
                                .filter(|b| b.family_group_id == g.id)
                                .count(),
                        )
                        .unwrap_or(i32::MAX),
                    })
            } else {
                None
            };
            listings.push(AccountListing {
                account: account.clone(),
                family,
            });
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
        let mut state = self.state.lock().await;

        let account = state
            .accounts
            .get_mut(&account_id.as_i64())
            .filter(|a| a.account_type == AccountType::Temporary)
            .ok_or(StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })?;
        if account.status != AccountStatus::Available {
            return Err(StoreError::AccountUnavailable);
        }
        account.status = AccountStatus::Locked;

        #[cfg(test)]
        if state.fail_next_usage_insert {
            state.fail_next_usage_insert = false;
            // Undo the status flip, as a real transaction rollback would.
            if let Some(account) = state.accounts.get_mut(&account_id.as_i64()) {
                account.status = AccountStatus::Available;
            }
            return Err(StoreError::Database("injected usage insert failure".into()));
        }

        let now = Utc::now();
        let expires_at = now + Duration::hours(TEMPORARY_LEASE_HOURS);
        state.usages.push(mailpool_core::TemporaryUsage {
            account_id,
            user_id,
            started_at: now,
            expires_at,
            returned_at: None,
        });

        tracing::info!(%account_id, %user_id, %expires_at, "temporary account claimed");
        Ok(expires_at)
    }

    async fn release_temporary(&self, account_id: AccountId, user_id: UserId) -> Result<()> {
        let mut state = self.state.lock().await;

        let usage = state
            .usages
            .iter_mut()
            .filter(|u| {
                u.account_id == account_id && u.user_id == user_id && u.returned_at.is_none()
            })
            .max_by_key(|u| u.started_at)
            .ok_or(StoreError::NotFound {
                entity: "usage",
                id: account_id.to_string(),
            })?;
        usage.returned_at = Some(Utc::now());

        if let Some(account) = state
            .accounts
            .get_mut(&account_id.as_i64())
            .filter(|a| {
                a.account_type == AccountType::Temporary && a.status == AccountStatus::Locked
            })
        {
            account.status = AccountStatus::Available;
        }

        tracing::info!(%account_id, %user_id, "temporary account released");
        Ok(())
    }

    async fn purchase_exclusive(
        &self,
        account_id: AccountId,
        user_id: UserId,
        payment_id: Option<PaymentId>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        let account = state
            .accounts
            .get(&account_id.as_i64())
            .filter(|a| a.account_type == AccountType::Exclusive)
            .ok_or(StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })?;
        if account.status != AccountStatus::Available {
            return Err(StoreError::AccountUnavailable);
        }
        if state.purchases.iter().any(|p| p.account_id == account_id) {
            return Err(StoreError::AccountUnavailable);
        }

        if let Some(account) = state.accounts.get_mut(&account_id.as_i64()) {
            account.status = AccountStatus::Sold;
        }
        state.purchases.push(ExclusivePurchase {
            account_id,
            user_id,
            payment_id,
            purchased_at: Utc::now(),
        });

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
        let mut state = self.state.lock().await;

        let exists = state
            .accounts
            .get(&account_id.as_i64())
            .is_some_and(|a| a.account_type == AccountType::Family);
        if !exists {
            return Err(StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            });
        }

        let group_id = match state.groups.values().find(|g| g.account_id == account_id) {
            Some(group) => group.id,
            None => {
                let id = next_id(&state.groups);
                state.groups.insert(
                    id,
                    FamilyGroup {
                        id: GroupId::new(id),
                        account_id,
                        capacity: DEFAULT_FAMILY_CAPACITY,
                    },
                );
                GroupId::new(id)
            }
        };
        let capacity = state.groups[&group_id.as_i64()].capacity;

        let used = state
            .bindings
            .iter()
            .filter(|b| b.family_group_id == group_id)
            .count();
        if used >= usize::try_from(capacity).unwrap_or(usize::MAX) {
            return Err(StoreError::FamilyGroupFull);
        }
        if state
            .bindings
            .iter()
            .any(|b| b.family_group_id == group_id && b.user_id == user_id)
        {
            return Err(StoreError::AlreadyBound);
        }

        state.bindings.push(FamilyBinding {
            family_group_id: group_id,
            user_id,
            member_email: member_email.to_string(),
            member_password_enc: member_password_enc.to_string(),
            bound_at: Utc::now(),
        });

        tracing::info!(%account_id, %user_id, "family binding created");
        Ok(())
    }

    async fn unbind_family(&self, account_id: AccountId, user_id: UserId) -> Result<()> {
        let mut state = self.state.lock().await;

        let group_id = state
            .groups
            .values()
            .find(|g| g.account_id == account_id)
            .map(|g| g.id)
            .ok_or(StoreError::NotFound {
                entity: "family group",
                id: account_id.to_string(),
            })?;

        // Removing nothing is still success.
        state
            .bindings
            .retain(|b| !(b.family_group_id == group_id && b.user_id == user_id));

        tracing::info!(%account_id, %user_id, "family binding removed");
        Ok(())
    }

    async fn exclusive_credentials(
        &self,
        account_id: AccountId,
        user_id: UserId,
    ) -> Result<Account> {
        let state = self.state.lock().await;

        let purchased = state
            .purchases
            .iter()
            .any(|p| p.account_id == account_id && p.user_id == user_id);
        if !purchased {
            return Err(StoreError::NoPurchase);
        }

        state
            .accounts
            .get(&account_id.as_i64())
            .filter(|a| a.account_type == AccountType::Exclusive)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })
    }

    // =========================================================================
    // License / Payment Engine
    // =========================================================================

    async fn create_payment(&self, new: NewPayment) -> Result<Payment> {
        let mut state = self.state.lock().await;

        if state.payments.values().any(|p| p.order_no == new.order_no) {
            return Err(StoreError::DuplicateOrderNo {
                order_no: new.order_no,
            });
        }

        let id = next_id(&state.payments);
        let payment = Payment {
            id: PaymentId::new(id),
            order_no: new.order_no,
            user_id: new.user_id,
            amount_cents: new.amount_cents,
            product_type: new.product_type,
            quota_amount: new.quota_amount,
            status: PaymentStatus::Pending,
            payment_method: None,
            transaction_id: None,
            paid_at: None,
            expired_at: new.expired_at,
            created_at: Utc::now(),
        };
        state.payments.insert(id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, order_no: &str, user_id: UserId) -> Result<Payment> {
        let state = self.state.lock().await;
        state
            .payments
            .values()
            .find(|p| p.order_no == order_no && p.user_id == user_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "order",
                id: order_no.to_string(),
            })
    }

    async fn settle_payment(
        &self,
        order_no: &str,
        transaction_id: &str,
        payment_method: &str,
    ) -> Result<LicenseKey> {
        let mut state = self.state.lock().await;

        let payment_id = state
            .payments
            .values()
            .find(|p| p.order_no == order_no)
            .map(|p| p.id.as_i64())
            .ok_or(StoreError::NotFound {
                entity: "order",
                id: order_no.to_string(),
            })?;

        let now = Utc::now();
        let (user_id, product_type, quota_amount) = {
            let payment = state
                .payments
                .get_mut(&payment_id)
                .ok_or(StoreError::NotFound {
                    entity: "order",
                    id: order_no.to_string(),
                })?;
            if payment.status != PaymentStatus::Pending {
                return Err(StoreError::InvalidPaymentState {
                    status: payment.status.as_str().to_string(),
                });
            }
            if now > payment.expired_at {
                payment.status = PaymentStatus::Expired;
                return Err(StoreError::OrderExpired);
            }
            payment.status = PaymentStatus::Paid;
            payment.payment_method = Some(payment_method.to_string());
            payment.transaction_id = Some(transaction_id.to_string());
            payment.paid_at = Some(now);
            (payment.user_id, payment.product_type, payment.quota_amount)
        };

        let key_id = next_id(&state.keys);
        let key = LicenseKey {
            id: KeyId::new(key_id),
            key_code: generate_key_code(),
            user_id,
            payment_id: PaymentId::new(payment_id),
            product_type,
            quota_total: quota_amount,
            quota_used: 0,
            status: KeyStatus::Active,
            activated_at: None,
            created_at: now,
        };
        state.keys.insert(key_id, key.clone());

        tracing::info!(order_no, %user_id, key_id = %key.id, "payment settled, key issued");
        Ok(key)
    }

    async fn list_keys(&self, user_id: UserId) -> Result<Vec<LicenseKey>> {
        let state = self.state.lock().await;
        let mut keys: Vec<LicenseKey> = state
            .keys
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn activate_key(&self, key_code: &str, user_id: UserId) -> Result<LicenseKey> {
        let mut state = self.state.lock().await;

        let key = state
            .keys
            .values_mut()
            .find(|k| k.key_code == key_code)
            .ok_or(StoreError::NotFound {
                entity: "key",
                id: key_code.to_string(),
            })?;

        match key.status {
            KeyStatus::Revoked => return Err(StoreError::KeyRevoked),
            KeyStatus::Exhausted => return Err(StoreError::KeyExhausted),
            KeyStatus::Active => {}
        }

        if key.activated_at.is_some() {
            if key.user_id != user_id {
                return Err(StoreError::ActivatedByOther);
            }
            return Ok(key.clone());
        }

        key.user_id = user_id;
        key.activated_at = Some(Utc::now());

        tracing::info!(key_id = %key.id, %user_id, "license key activated");
        Ok(key.clone())
    }

    async fn get_key(&self, key_code: &str, user_id: UserId) -> Result<Option<LicenseKey>> {
        let state = self.state.lock().await;
        Ok(state
            .keys
            .values()
            .find(|k| k.key_code == key_code && k.user_id == user_id)
            .cloned())
    }

    async fn consume_quota(&self, key_id: KeyId, amount: i64) -> Result<()> {
        let mut state = self.state.lock().await;

        let key = state
            .keys
            .get_mut(&key_id.as_i64())
            .ok_or(StoreError::NotFound {
                entity: "key",
                id: key_id.to_string(),
            })?;

        key.quota_used += amount;
        if key.quota_used >= key.quota_total && key.status == KeyStatus::Active {
            key.status = KeyStatus::Exhausted;
            tracing::info!(
                %key_id,
                quota_used = key.quota_used,
                quota_total = key.quota_total,
                "license key exhausted"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn current_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.expires_at)
            .cloned())
    }

    async fn renew_subscription(
        &self,
        user_id: UserId,
        plan: &str,
        duration_days: i64,
    ) -> Result<Subscription> {
        let mut state = self.state.lock().await;

        let now = Utc::now();
        let current = state
            .subscriptions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .max_by_key(|s| s.expires_at);

        let subscription = if let Some(sub) = current {
            sub.expires_at = renewed_expiry(now, Some(sub.expires_at), duration_days);
            sub.plan = plan.to_string();
            sub.clone()
        } else {
            let sub = Subscription {
                user_id,
                plan: plan.to_string(),
                expires_at: renewed_expiry(now, None, duration_days),
                status: SubscriptionStatus::Active,
            };
            state.subscriptions.push(sub.clone());
            sub
        };

        tracing::info!(%user_id, plan, expires_at = %subscription.expires_at, "subscription renewed");
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn seed(store: &MemStore, account_type: AccountType, email: &str) -> AccountId {
        store
            .insert_account(NewAccount {
                account_type,
                email: email.to_string(),
                password: "hunter2".to_string(),
                totp_secret: None,
                source: "test-batch".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    async fn pending_payment(store: &MemStore, user: UserId, quota: i64) -> Payment {
        store
            .create_payment(NewPayment {
                order_no: mailpool_core::generate_order_no(),
                user_id: user,
                amount_cents: 1000,
                product_type: mailpool_core::ProductType::Basic,
                quota_amount: quota,
                expired_at: Utc::now() + Duration::minutes(15),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn claim_then_release_cycle() {
        let store = MemStore::new();
        let account_id = seed(&store, AccountType::Temporary, "tmp1@pool.test").await;
        let user = UserId::new(10);

        let expires = store.claim_temporary(account_id, user).await.unwrap();
        assert!(expires > Utc::now() + Duration::hours(23));
        let account = store.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Locked);

        // A second claimant is rejected while the lease is open.
        let err = store
            .claim_temporary(account_id, UserId::new(11))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AccountUnavailable));

        store.release_temporary(account_id, user).await.unwrap();
        let account = store.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Available);

        // The pool can hand the account out again.
        store
            .claim_temporary(account_id, UserId::new(11))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_without_open_usage_is_not_found() {
        let store = MemStore::new();
        let account_id = seed(&store, AccountType::Temporary, "tmp2@pool.test").await;

        let err = store
            .release_temporary(account_id, UserId::new(10))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn release_only_closes_the_callers_usage() {
        let store = MemStore::new();
        let account_id = seed(&store, AccountType::Temporary, "tmp3@pool.test").await;
        store
            .claim_temporary(account_id, UserId::new(10))
            .await
            .unwrap();

        // A different user cannot return someone else's claim.
        let err = store
            .release_temporary(account_id, UserId::new(11))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        let account = store.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Locked);
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = Arc::new(MemStore::new());
        let account_id = seed(&store, AccountType::Temporary, "tmp4@pool.test").await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim_temporary(account_id, UserId::new(i)).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn failed_claim_rolls_back_the_status_flip() {
        let store = MemStore::new();
        let account_id = seed(&store, AccountType::Temporary, "tmp5@pool.test").await;

        store.fail_next_usage_insert().await;
        let err = store
            .claim_temporary(account_id, UserId::new(10))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        // No half-applied state: still available, and claimable again.
        let account = store.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Available);
        store
            .claim_temporary(account_id, UserId::new(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exclusive_sale_is_single_winner_and_irreversible() {
        let store = Arc::new(MemStore::new());
        let account_id = seed(&store, AccountType::Exclusive, "exc1@pool.test").await;

        let mut handles = Vec::new();
        for i in 0..6 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .purchase_exclusive(account_id, UserId::new(i), None)
                    .await
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);

        let account = store.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Sold);
    }

    #[tokio::test]
    async fn credentials_require_a_purchase_record() {
        let store = MemStore::new();
        let account_id = seed(&store, AccountType::Exclusive, "exc2@pool.test").await;
        let buyer = UserId::new(20);

        store
            .purchase_exclusive(account_id, buyer, Some(PaymentId::new(1)))
            .await
            .unwrap();

        let account = store.exclusive_credentials(account_id, buyer).await.unwrap();
        assert_eq!(account.password, "hunter2");

        let err = store
            .exclusive_credentials(account_id, UserId::new(21))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoPurchase));
    }

    #[tokio::test]
    async fn family_capacity_duplicates_and_unbind() {
        let store = MemStore::new();
        let account_id = seed(&store, AccountType::Family, "fam1@pool.test").await;

        for i in 1..=5 {
            store
                .bind_family(account_id, UserId::new(i), "member@pool.test", "enc")
                .await
                .unwrap();
        }

        let err = store
            .bind_family(account_id, UserId::new(6), "late@pool.test", "enc")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::FamilyGroupFull));

        // Unbinding frees a slot; unbinding a non-member is a quiet success.
        store.unbind_family(account_id, UserId::new(3)).await.unwrap();
        store.unbind_family(account_id, UserId::new(99)).await.unwrap();
        store
            .bind_family(account_id, UserId::new(6), "late@pool.test", "enc")
            .await
            .unwrap();

        let err = store
            .bind_family(account_id, UserId::new(6), "late@pool.test", "enc")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyBound));
    }

    #[tokio::test]
    async fn unbind_without_group_is_not_found() {
        let store = MemStore::new();
        let account_id = seed(&store, AccountType::Family, "fam2@pool.test").await;

        let err = store
            .unbind_family(account_id, UserId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn listings_exclude_retired_and_report_family_occupancy() {
        let store = MemStore::new();
        seed(&store, AccountType::Temporary, "l1@pool.test").await;
        let family_id = seed(&store, AccountType::Family, "l2@pool.test").await;
        let retired_id = seed(&store, AccountType::Exclusive, "l3@pool.test").await;
        store
            .state
            .lock()
            .await
            .accounts
            .get_mut(&retired_id.as_i64())
            .unwrap()
            .status = AccountStatus::Retired;

        store
            .bind_family(family_id, UserId::new(1), "m@pool.test", "enc")
            .await
            .unwrap();
        store
            .bind_family(family_id, UserId::new(2), "m@pool.test", "enc")
            .await
            .unwrap();

        let listings = store.list_accounts(AccountFilter::default()).await.unwrap();
        assert_eq!(listings.len(), 2);
        let family = listings
            .iter()
            .find(|l| l.account.id == family_id)
            .unwrap()
            .family
            .unwrap();
        assert_eq!(family.capacity, 5);
        assert_eq!(family.used, 2);

        let only_family = store
            .list_accounts(AccountFilter {
                account_type: Some(AccountType::Family),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(only_family.len(), 1);
    }

    #[tokio::test]
    async fn settlement_issues_one_key_and_rejects_replays() {
        let store = MemStore::new();
        let user = UserId::new(30);
        let payment = pending_payment(&store, user, 100).await;

        let key = store
            .settle_payment(&payment.order_no, "txn-1", "alipay")
            .await
            .unwrap();
        assert_eq!(key.user_id, user);
        assert_eq!(key.quota_total, 100);
        assert_eq!(key.quota_used, 0);
        assert_eq!(key.status, KeyStatus::Active);
        assert!(key.activated_at.is_none());

        let settled = store.get_payment(&payment.order_no, user).await.unwrap();
        assert_eq!(settled.status, PaymentStatus::Paid);
        assert_eq!(settled.transaction_id.as_deref(), Some("txn-1"));

        // A duplicate callback must not mint a second key.
        let err = store
            .settle_payment(&payment.order_no, "txn-1", "alipay")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPaymentState { .. }));
        assert_eq!(store.list_keys(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overdue_order_expires_instead_of_settling() {
        let store = MemStore::new();
        let user = UserId::new(31);
        let payment = store
            .create_payment(NewPayment {
                order_no: mailpool_core::generate_order_no(),
                user_id: user,
                amount_cents: 1000,
                product_type: mailpool_core::ProductType::Basic,
                quota_amount: 100,
                expired_at: Utc::now() - Duration::minutes(1),
            })
            .await
            .unwrap();

        let err = store
            .settle_payment(&payment.order_no, "txn-late", "alipay")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OrderExpired));

        let expired = store.get_payment(&payment.order_no, user).await.unwrap();
        assert_eq!(expired.status, PaymentStatus::Expired);
        assert!(store.list_keys(user).await.unwrap().is_empty());

        // Expiry is final; a retry is no longer pending.
        let err = store
            .settle_payment(&payment.order_no, "txn-late", "alipay")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPaymentState { .. }));
    }

    #[tokio::test]
    async fn duplicate_order_numbers_are_rejected() {
        let store = MemStore::new();
        let user = UserId::new(32);
        let payment = pending_payment(&store, user, 100).await;

        let err = store
            .create_payment(NewPayment {
                order_no: payment.order_no.clone(),
                user_id: user,
                amount_cents: 1000,
                product_type: mailpool_core::ProductType::Basic,
                quota_amount: 100,
                expired_at: Utc::now() + Duration::minutes(15),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrderNo { .. }));
    }

    #[tokio::test]
    async fn first_activation_wins_and_binds_ownership() {
        let store = MemStore::new();
        let buyer = UserId::new(40);
        let payment = pending_payment(&store, buyer, 100).await;
        let key = store
            .settle_payment(&payment.order_no, "txn", "wechat")
            .await
            .unwrap();

        let activator = UserId::new(41);
        let activated = store.activate_key(&key.key_code, activator).await.unwrap();
        assert_eq!(activated.user_id, activator);
        assert!(activated.activated_at.is_some());

        // Re-activation by the owner is idempotent; anyone else is rejected.
        store.activate_key(&key.key_code, activator).await.unwrap();
        let err = store
            .activate_key(&key.key_code, UserId::new(42))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ActivatedByOther));
    }

    #[tokio::test]
    async fn revoked_and_exhausted_keys_cannot_activate() {
        let store = MemStore::new();
        let user = UserId::new(43);
        let payment = pending_payment(&store, user, 1).await;
        let key = store
            .settle_payment(&payment.order_no, "txn", "alipay")
            .await
            .unwrap();

        store.consume_quota(key.id, 1).await.unwrap();
        let err = store.activate_key(&key.key_code, user).await.unwrap_err();
        assert!(matches!(err, StoreError::KeyExhausted));

        store
            .state
            .lock()
            .await
            .keys
            .get_mut(&key.id.as_i64())
            .unwrap()
            .status = KeyStatus::Revoked;
        let err = store.activate_key(&key.key_code, user).await.unwrap_err();
        assert!(matches!(err, StoreError::KeyRevoked));
    }

    #[tokio::test]
    async fn quota_increments_are_never_lost() {
        let store = Arc::new(MemStore::new());
        let user = UserId::new(44);
        let payment = pending_payment(&store, user, 10).await;
        let key = store
            .settle_payment(&payment.order_no, "txn", "alipay")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            let key_id = key.id;
            handles.push(tokio::spawn(async move {
                store.consume_quota(key_id, 1).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let key = store
            .get_key(&key.key_code, user)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key.quota_used, 10);
        assert_eq!(key.quota_remaining(), 0);
        assert_eq!(key.status, KeyStatus::Exhausted);
    }

    #[tokio::test]
    async fn subscription_renewal_stacks_remaining_time() {
        let store = MemStore::new();
        let user = UserId::new(50);

        assert!(store.current_subscription(user).await.unwrap().is_none());

        let first = store.renew_subscription(user, "monthly", 30).await.unwrap();
        let second = store.renew_subscription(user, "monthly", 30).await.unwrap();
        assert_eq!(second.expires_at, first.expires_at + Duration::days(30));

        let current = store.current_subscription(user).await.unwrap().unwrap();
        assert!(current.is_active_at(Utc::now()));
    }
}
