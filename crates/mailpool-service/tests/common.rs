//! Common test utilities for mailpool integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;

use mailpool_core::{AccountType, UserId};
use mailpool_service::{auth, create_router, AppState, ServiceConfig, StaticVerifier};
use mailpool_store::{MemStore, NewAccount, Store};

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct handle on the in-memory store for seeding.
    pub store: Arc<MemStore>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// The admin API key for inventory import.
    pub admin_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh store and unsigned callbacks.
    pub fn new() -> Self {
        Self::with_callback_secret(None)
    }

    /// Create a harness, optionally requiring signed payment callbacks.
    pub fn with_callback_secret(secret: Option<&str>) -> Self {
        let store = Arc::new(MemStore::new());
        let admin_key = "test-admin-key".to_string();

        let config = ServiceConfig {
            jwt_secret: "test-secret".into(),
            admin_api_key: Some(admin_key.clone()),
            payment_callback_secret: secret.map(str::to_string),
            ..ServiceConfig::default()
        };

        let verifier = StaticVerifier::new()
            .with_user("alice@mail.test", "correct-horse", UserId::new(1))
            .with_user("bob@mail.test", "battery-staple", UserId::new(2));

        let state = AppState::new(
            Arc::clone(&store) as Arc<dyn Store>,
            config,
            Arc::new(verifier),
        );
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            test_user_id: UserId::new(1),
            admin_key,
        }
    }

    /// Bearer header for an arbitrary user.
    pub fn auth_header(&self, user_id: UserId) -> String {
        let email = format!("user{user_id}@mail.test");
        let token = auth::issue_token("test-secret", user_id, &email, 7)
            .expect("Failed to sign test token");
        format!("Bearer {token}")
    }

    /// Bearer header for the default test user.
    pub fn user_auth_header(&self) -> String {
        self.auth_header(self.test_user_id)
    }

    /// Give a user an active subscription (the pool surface requires one).
    pub async fn subscribe(&self, user_id: UserId) {
        self.store
            .renew_subscription(user_id, "monthly", 30)
            .await
            .expect("Failed to seed subscription");
    }

    /// Seed one pool account and return its id.
    pub async fn seed_account(&self, account_type: AccountType, email: &str) -> i64 {
        self.store
            .insert_account(NewAccount {
                account_type,
                email: email.to_string(),
                password: "pw-secret".to_string(),
                totp_secret: None,
                source: "seed".to_string(),
            })
            .await
            .expect("Failed to seed account")
            .id
            .as_i64()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
