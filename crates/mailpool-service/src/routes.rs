//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::{middleware, Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use mailpool_core::Feature;

use crate::gate;
use crate::handlers::{accounts, health, payments, session, subscriptions, verify};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/products` - Product catalog
/// - `POST /v1/auth/token` - Login (rate limited per client IP)
/// - `POST /v1/payments/notify` - Payment-platform callback (signed)
///
/// ## Account pool (JWT + active subscription)
/// - `GET /v1/accounts` - List pool accounts
/// - `POST /v1/accounts/:id/claim` - Claim a temporary account
/// - `POST /v1/accounts/:id/release` - Return a temporary account
/// - `POST /v1/accounts/:id/purchase` - Buy an exclusive account
/// - `POST /v1/accounts/:id/bind` - Bind a family member slot
/// - `DELETE /v1/accounts/:id/bind` - Remove the caller's binding
/// - `GET /v1/accounts/:id/credentials` - Purchased-account credentials
///
/// ## Orders and keys (JWT)
/// - `POST /v1/orders` - Create a pending order
/// - `GET /v1/orders/:order_no` - Fetch one order
/// - `GET /v1/keys` - List the caller's keys
/// - `POST /v1/keys/activate` - Activate a key (first activation wins)
/// - `GET /v1/keys/check` - Key status, no quota cost
///
/// ## Subscription (JWT)
/// - `GET /v1/subscription` - Entitlement status
/// - `POST /v1/subscription/activate` - Start or extend
///
/// ## Quota-gated (JWT + license key)
/// - `POST /v1/verify` - Classify an email address (1 quota unit)
///
/// ## Admin (`X-Admin-Key`)
/// - `POST /v1/accounts/import` - Add inventory
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // The pool surface requires an active subscription on top of the JWT.
    let pool = Router::new()
        .route("/v1/accounts", get(accounts::list_accounts))
        .route("/v1/accounts/:id/claim", post(accounts::claim_temporary))
        .route("/v1/accounts/:id/release", post(accounts::release_temporary))
        .route(
            "/v1/accounts/:id/purchase",
            post(accounts::purchase_exclusive),
        )
        .route("/v1/accounts/:id/bind", post(accounts::bind_family))
        .route("/v1/accounts/:id/bind", delete(accounts::unbind_family))
        .route(
            "/v1/accounts/:id/credentials",
            get(accounts::exclusive_credentials),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            gate::subscription_gate,
        ));

    // The limiter check reads only headers, so blocked clients are answered
    // before the login body is parsed.
    let auth = Router::new()
        .route("/v1/auth/token", post(session::create_token))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            gate::login_rate_limit_gate,
        ));

    // Quota-gated routes carry their required feature as an extension the
    // license gate reads.
    let gated = Router::new()
        .route("/v1/verify", post(verify::verify_email))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            gate::license_gate,
        ))
        .layer(Extension(Feature::EmailVerify));

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Catalog and orders
        .route("/v1/products", get(payments::list_products))
        .route("/v1/orders", post(payments::create_order))
        .route("/v1/orders/:order_no", get(payments::get_order))
        // Payment callback
        .route("/v1/payments/notify", post(payments::payment_notify))
        // License keys
        .route("/v1/keys", get(payments::list_keys))
        .route("/v1/keys/activate", post(payments::activate_key))
        .route("/v1/keys/check", get(payments::check_key))
        // Subscription
        .route("/v1/subscription", get(subscriptions::get_subscription))
        .route(
            "/v1/subscription/activate",
            post(subscriptions::activate_subscription),
        )
        // Admin
        .route("/v1/accounts/import", post(accounts::import_accounts))
        .merge(auth)
        .merge(pool)
        .merge(gated)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
