//! Token issuance: the login endpoint behind the rate limiter.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::issue_token;
use crate::error::ApiError;
use crate::gate::client_ip;
use crate::state::AppState;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Login email.
    pub email: String,
    /// Login password.
    pub password: String,
}

/// Issued-token response.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// The signed bearer token.
    pub token: String,
    /// The authenticated user's id.
    pub user_id: i64,
    /// The authenticated user's email.
    pub email: String,
    /// Token lifetime in seconds.
    pub expires_in: i64,
}

/// Exchange credentials for a bearer token.
///
/// Failed attempts count against the client IP; five failures inside ten
/// minutes block the client for fifteen minutes. Blocked clients are shed by
/// [`crate::gate::login_rate_limit_gate`] before this handler's body
/// extractor runs.
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let client = client_ip(&headers);

    let Some(user) = state.verifier.verify(&body.email, &body.password).await else {
        state.rate_limiter.record_failure(&client);
        let remaining_attempts = state.rate_limiter.remaining_attempts(&client);
        tracing::info!(client, remaining_attempts, "login attempt failed");
        return Err(ApiError::InvalidCredentials { remaining_attempts });
    };

    state.rate_limiter.record_success(&client);

    let token = issue_token(
        &state.config.jwt_secret,
        user.user_id,
        &user.email,
        state.config.jwt_ttl_days,
    )?;

    Ok(Json(TokenResponse {
        token,
        user_id: user.user_id.as_i64(),
        email: user.email,
        expires_in: state.config.jwt_ttl_days * 24 * 60 * 60,
    }))
}
