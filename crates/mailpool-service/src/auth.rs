//! Authentication: JWT issuance/validation, credential verification, and the
//! request extractors built on them.
//!
//! - [`AuthUser`] - end-user authentication via a bearer JWT
//! - [`AdminAuth`] - inventory-import authentication via `X-Admin-Key`
//! - [`CredentialVerifier`] - the pluggable identity check behind the token
//!   endpoint

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use mailpool_core::UserId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// Claims carried in user JWTs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject: the user id, as a decimal string.
    pub sub: String,
    /// The user's login email.
    pub email: String,
    /// Expiration time (unix seconds).
    pub exp: i64,
    /// Issued at (unix seconds).
    pub iat: i64,
}

/// Issue a signed HS256 token for a verified user.
///
/// # Errors
///
/// Returns `Internal` if signing fails, which only happens with a malformed
/// secret.
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    email: &str,
    ttl_days: i64,
) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: (now + Duration::days(ttl_days)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
}

fn decode_token(secret: &str, token: &str) -> Result<JwtClaims, ApiError> {
    decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}

/// An authenticated user extracted from a bearer JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user id from the token subject.
    pub user_id: UserId,
    /// The login email from the token.
    pub email: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let claims = decode_token(&state.config.jwt_secret, token)?;
        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(AuthUser {
            user_id,
            email: claims.email,
        })
    }
}

/// Admin authentication via the `X-Admin-Key` header.
#[derive(Debug, Clone)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected = state
            .config
            .admin_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(presented, expected) {
            return Err(ApiError::Unauthorized);
        }

        Ok(AdminAuth)
    }
}

/// A user whose credentials checked out.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    /// The user's id in the identity system.
    pub user_id: UserId,
    /// The canonical login email.
    pub email: String,
}

/// The identity check behind `POST /v1/auth/token`.
///
/// Password storage and hashing live with the identity provider, not here;
/// the service only needs a yes/no answer plus the user id.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Check a login attempt. `None` means the credentials are wrong; the
    /// caller must not learn whether the email exists.
    async fn verify(&self, email: &str, password: &str) -> Option<VerifiedUser>;
}

/// A fixed credential table, for tests and local development.
#[derive(Debug, Default)]
pub struct StaticVerifier {
    users: HashMap<String, (String, UserId)>,
}

impl StaticVerifier {
    /// Create an empty verifier that rejects everyone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user that will verify with the given password.
    #[must_use]
    pub fn with_user(mut self, email: &str, password: &str, user_id: UserId) -> Self {
        self.users
            .insert(email.to_string(), (password.to_string(), user_id));
        self
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    async fn verify(&self, email: &str, password: &str) -> Option<VerifiedUser> {
        let (expected, user_id) = self.users.get(email)?;
        if constant_time_eq(expected, password) {
            Some(VerifiedUser {
                user_id: *user_id,
                email: email.to_string(),
            })
        } else {
            None
        }
    }
}
