//! Entitlement middleware: subscription checks and quota-gated routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;
use chrono::Utc;

use mailpool_core::{Feature, LicenseKey};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Shed blocked login clients before the request body is even read.
///
/// Only headers are consulted here; a blocked client gets its 429 without
/// paying for body parsing.
pub async fn login_rate_limit_gate(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_ip(req.headers());
    if let Err(retry_after_seconds) = state.rate_limiter.check(&client) {
        return Err(ApiError::TooManyRequests {
            retry_after_seconds,
        });
    }
    Ok(next.run(req).await)
}

/// Best-effort client identity for rate limiting.
///
/// Behind the reverse proxy the first `X-Forwarded-For` hop is the client;
/// without one, every caller shares the `local` bucket.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map_or_else(|| "local".to_string(), |ip| ip.trim().to_string())
}

/// Require an active subscription for the account-pool surface.
pub async fn subscription_gate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let subscription = state.store.current_subscription(auth.user_id).await?;
    let active = subscription.is_some_and(|s| s.is_active_at(Utc::now()));
    if !active {
        return Err(ApiError::Forbidden("active subscription required".into()));
    }
    Ok(next.run(req).await)
}

/// Gate a route behind an activated license key and consume one quota unit
/// after the handler succeeds.
///
/// The required [`Feature`] is attached to the route as an extension; the key
/// comes from the `X-License-Key` header or the `key` query parameter. The
/// resolved key is placed in request extensions for the handler.
pub async fn license_gate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Extension(feature): Extension<Feature>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key_code = key_code_from_request(&req).ok_or(ApiError::Unauthorized)?;

    let key = state
        .store
        .get_key(&key_code, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("license key not found for this user".into()))?;

    check_key(&key, feature)?;

    let key_id = key.id;
    req.extensions_mut().insert(key.clone());
    let response = next.run(req).await;

    // Quota only moves when the gated operation actually succeeded.
    if response.status().is_success() {
        if let Err(err) = state.store.consume_quota(key_id, 1).await {
            tracing::error!(%key_id, error = %err, "quota consumption failed");
        }
    }

    Ok(response)
}

fn check_key(key: &LicenseKey, feature: Feature) -> Result<(), ApiError> {
    match key.status {
        mailpool_core::KeyStatus::Revoked => {
            return Err(ApiError::Forbidden("license key revoked".into()))
        }
        mailpool_core::KeyStatus::Exhausted => {
            return Err(ApiError::Forbidden("license key quota exhausted".into()))
        }
        mailpool_core::KeyStatus::Active => {}
    }
    if key.activated_at.is_none() {
        return Err(ApiError::Forbidden("license key not activated".into()));
    }
    if key.quota_remaining() == 0 {
        return Err(ApiError::Forbidden("license key quota exhausted".into()));
    }
    if !key.product_type.allows(feature) {
        return Err(ApiError::Forbidden(format!(
            "feature not included in the {} tier",
            key.product_type.as_str()
        )));
    }
    Ok(())
}

fn key_code_from_request(req: &Request) -> Option<String> {
    if let Some(header) = req
        .headers()
        .get("x-license-key")
        .and_then(|v| v.to_str().ok())
    {
        return Some(header.to_string());
    }
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("key=").map(ToString::to_string)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailpool_core::{KeyId, KeyStatus, PaymentId, ProductType, UserId};

    fn key(product: ProductType, status: KeyStatus, used: i64) -> LicenseKey {
        LicenseKey {
            id: KeyId::new(1),
            key_code: "aaaa-bbbb-cccc-dddd".into(),
            user_id: UserId::new(1),
            payment_id: PaymentId::new(1),
            product_type: product,
            quota_total: 100,
            quota_used: used,
            status,
            activated_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn active_key_with_feature_passes() {
        let k = key(ProductType::Pro, KeyStatus::Active, 0);
        assert!(check_key(&k, Feature::EmailVerify).is_ok());
        assert!(check_key(&k, Feature::EmailImport).is_ok());
    }

    #[test]
    fn tier_mismatch_is_forbidden() {
        let k = key(ProductType::Basic, KeyStatus::Active, 0);
        assert!(check_key(&k, Feature::ApiAccess).is_err());
    }

    #[test]
    fn first_forwarded_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "9.8.7.6, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "9.8.7.6");
    }

    #[test]
    fn missing_forwarded_header_falls_back_to_local() {
        assert_eq!(client_ip(&HeaderMap::new()), "local");
    }

    #[test]
    fn unactivated_revoked_and_spent_keys_are_forbidden() {
        let mut k = key(ProductType::Basic, KeyStatus::Active, 0);
        k.activated_at = None;
        assert!(check_key(&k, Feature::EmailVerify).is_err());

        let k = key(ProductType::Basic, KeyStatus::Revoked, 0);
        assert!(check_key(&k, Feature::EmailVerify).is_err());

        let k = key(ProductType::Basic, KeyStatus::Active, 100);
        assert!(check_key(&k, Feature::EmailVerify).is_err());
    }
}
