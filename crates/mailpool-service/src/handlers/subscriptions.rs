//! Subscription handlers: status and renewal.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailpool_core::{SubscriptionStatus, DEFAULT_PLAN, DEFAULT_RENEWAL_DAYS};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Subscription status response.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Whether the subscription currently entitles the caller.
    pub active: bool,
    /// Plan label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// When entitlement lapses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Raw status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,
}

/// Get the caller's subscription status.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state.store.current_subscription(auth.user_id).await?;

    Ok(Json(match subscription {
        Some(sub) => SubscriptionResponse {
            active: sub.is_active_at(Utc::now()),
            plan: Some(sub.plan),
            expires_at: Some(sub.expires_at),
            status: Some(sub.status),
        },
        None => SubscriptionResponse {
            active: false,
            plan: None,
            expires_at: None,
            status: None,
        },
    }))
}

/// Renewal request body. Both fields default.
#[derive(Debug, Default, Deserialize)]
pub struct ActivateSubscriptionRequest {
    /// Plan label (default: `monthly`).
    pub plan: Option<String>,
    /// Renewal length in days (default: 30).
    pub duration_days: Option<i64>,
}

/// Start or extend the caller's subscription.
///
/// Renewal stacks: the new expiry extends from the current one when it is
/// still in the future, from now otherwise.
pub async fn activate_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    body: Option<Json<ActivateSubscriptionRequest>>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let plan = body.plan.unwrap_or_else(|| DEFAULT_PLAN.to_string());
    let duration_days = body.duration_days.unwrap_or(DEFAULT_RENEWAL_DAYS);
    if duration_days <= 0 {
        return Err(ApiError::BadRequest("duration_days must be positive".into()));
    }

    let subscription = state
        .store
        .renew_subscription(auth.user_id, &plan, duration_days)
        .await?;

    Ok(Json(SubscriptionResponse {
        active: true,
        plan: Some(subscription.plan),
        expires_at: Some(subscription.expires_at),
        status: Some(subscription.status),
    }))
}
