//! Application state.

use std::sync::Arc;

use mailpool_store::Store;

use crate::auth::CredentialVerifier;
use crate::config::ServiceConfig;
use crate::rate_limit::LoginRateLimiter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// The identity check behind the token endpoint.
    pub verifier: Arc<dyn CredentialVerifier>,

    /// Failed-login tracker for the token endpoint.
    pub rate_limiter: Arc<LoginRateLimiter>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        if config.admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not set - inventory import disabled");
        }
        if config.payment_callback_secret.is_none() {
            tracing::warn!("PAYMENT_CALLBACK_SECRET not set - callbacks accepted unsigned");
        }

        Self {
            store,
            config,
            verifier,
            rate_limiter: Arc::new(LoginRateLimiter::new()),
        }
    }
}
