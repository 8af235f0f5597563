//! Mailpool HTTP API service.
//!
//! This crate provides the HTTP surface over the account pool and license
//! engine:
//!
//! - Account pool: listing, temporary claims, exclusive purchases, family
//!   bindings
//! - Payments: product catalog, order creation, the payment-platform callback
//! - License keys: activation, status checks, quota-gated endpoints
//! - Subscriptions: entitlement to the account-pool surface
//!
//! # Authentication
//!
//! Three mechanisms, in decreasing frequency:
//!
//! 1. **User JWTs** (HS256) issued by `POST /v1/auth/token`, behind a
//!    per-client-IP rate limiter
//! 2. **License keys** via the `X-License-Key` header (or `key` query
//!    parameter) on quota-gated endpoints
//! 3. **Admin API key** via `X-Admin-Key` on inventory import

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers are async only for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use auth::{CredentialVerifier, StaticVerifier};
pub use config::ServiceConfig;
pub use error::ApiError;
pub use rate_limit::LoginRateLimiter;
pub use routes::create_router;
pub use state::AppState;
