//! Catalog, orders, the payment callback, and license-key handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use mailpool_core::{
    generate_order_no, product_for, Feature, KeyStatus, LicenseKey, Payment, PaymentStatus,
    ProductType, PRODUCT_CATALOG, ORDER_TTL_MINUTES,
};
use mailpool_store::{NewPayment, StoreError};

use crate::auth::AuthUser;
use crate::crypto::verify_callback_signature;
use crate::error::ApiError;
use crate::state::AppState;

/// One product in the catalog response.
#[derive(Debug, Serialize)]
pub struct ProductResponse {
    /// Tier identifier.
    #[serde(rename = "type")]
    pub product_type: ProductType,
    /// Display name.
    pub name: &'static str,
    /// Price in cents.
    pub price_cents: i64,
    /// Verification quota the issued key carries.
    pub quota_amount: i64,
    /// Feature tags included in this tier.
    pub features: Vec<Feature>,
}

/// List the product catalog (public).
pub async fn list_products() -> Json<Vec<ProductResponse>> {
    Json(
        PRODUCT_CATALOG
            .iter()
            .map(|p| ProductResponse {
                product_type: p.product_type,
                name: p.name,
                price_cents: p.price_cents,
                quota_amount: p.quota_amount,
                features: p.features.to_vec(),
            })
            .collect(),
    )
}

/// Order creation request body.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Product tier to buy.
    #[serde(rename = "type")]
    pub product_type: String,
}

/// An order, as returned to its owner.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    /// Unique order number.
    pub order_no: String,
    /// Product tier.
    #[serde(rename = "type")]
    pub product_type: ProductType,
    /// Price in cents.
    pub amount_cents: i64,
    /// Quota the issued key will carry.
    pub quota_amount: i64,
    /// Current status.
    pub status: PaymentStatus,
    /// When the pending order stops being payable.
    pub expired_at: DateTime<Utc>,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for OrderResponse {
    fn from(payment: Payment) -> Self {
        Self {
            order_no: payment.order_no,
            product_type: payment.product_type,
            amount_cents: payment.amount_cents,
            quota_amount: payment.quota_amount,
            status: payment.status,
            expired_at: payment.expired_at,
            created_at: payment.created_at,
        }
    }
}

/// Create a pending order for a catalog product.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let product_type = ProductType::parse(&body.product_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown product: {}", body.product_type)))?;
    let product = product_for(product_type);

    // Order numbers carry a random suffix; on the rare collision, one retry
    // with a fresh number is enough.
    let mut attempts = 0;
    let payment = loop {
        let result = state
            .store
            .create_payment(NewPayment {
                order_no: generate_order_no(),
                user_id: auth.user_id,
                amount_cents: product.price_cents,
                product_type,
                quota_amount: product.quota_amount,
                expired_at: Utc::now() + Duration::minutes(ORDER_TTL_MINUTES),
            })
            .await;
        match result {
            Ok(payment) => break payment,
            Err(StoreError::DuplicateOrderNo { .. }) if attempts == 0 => {
                attempts += 1;
            }
            Err(err) => return Err(err.into()),
        }
    };

    tracing::info!(order_no = %payment.order_no, user_id = %auth.user_id, "order created");
    Ok(Json(payment.into()))
}

/// Fetch one of the caller's orders.
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(order_no): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let payment = state.store.get_payment(&order_no, auth.user_id).await?;
    Ok(Json(payment.into()))
}

/// Payment-platform callback body.
#[derive(Debug, Deserialize)]
pub struct PaymentNotify {
    /// The order being settled.
    pub order_no: String,
    /// Platform transaction identifier.
    pub transaction_id: String,
    /// Payment channel (`alipay`, `wechat`, …).
    pub payment_method: String,
    /// HMAC-SHA256 signature over the callback, hex-encoded.
    pub sign: Option<String>,
}

/// A license key, as returned to its owner.
#[derive(Debug, Serialize)]
pub struct KeyResponse {
    /// The `XXXX-XXXX-XXXX-XXXX` code.
    pub key_code: String,
    /// Product tier the key unlocks.
    #[serde(rename = "type")]
    pub product_type: ProductType,
    /// Total quota issued.
    pub quota_total: i64,
    /// Quota consumed so far.
    pub quota_used: i64,
    /// Quota still available.
    pub quota_remaining: i64,
    /// Current status.
    pub status: KeyStatus,
    /// When the key was first activated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    /// When the key was issued.
    pub created_at: DateTime<Utc>,
}

impl From<LicenseKey> for KeyResponse {
    fn from(key: LicenseKey) -> Self {
        Self {
            quota_remaining: key.quota_remaining(),
            key_code: key.key_code,
            product_type: key.product_type,
            quota_total: key.quota_total,
            quota_used: key.quota_used,
            status: key.status,
            activated_at: key.activated_at,
            created_at: key.created_at,
        }
    }
}

/// Settle an order on the payment platform's callback.
///
/// When a callback secret is configured, the `sign` field must carry a valid
/// HMAC over the order number and transaction id; unsigned callbacks are only
/// accepted without a configured secret.
pub async fn payment_notify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PaymentNotify>,
) -> Result<Json<KeyResponse>, ApiError> {
    if let Some(secret) = &state.config.payment_callback_secret {
        let valid = body.sign.as_deref().is_some_and(|sign| {
            verify_callback_signature(secret, &body.order_no, &body.transaction_id, sign)
        });
        if !valid {
            tracing::warn!(order_no = %body.order_no, "callback signature rejected");
            return Err(ApiError::Unauthorized);
        }
    }

    let key = state
        .store
        .settle_payment(&body.order_no, &body.transaction_id, &body.payment_method)
        .await?;

    Ok(Json(key.into()))
}

/// List the caller's keys, newest first.
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<KeyResponse>>, ApiError> {
    let keys = state.store.list_keys(auth.user_id).await?;
    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

/// Key activation request body.
#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    /// The key code to activate.
    pub key_code: String,
}

/// Activate a key for the caller. First activation wins.
pub async fn activate_key(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ActivateRequest>,
) -> Result<Json<KeyResponse>, ApiError> {
    let key = state.store.activate_key(&body.key_code, auth.user_id).await?;
    Ok(Json(key.into()))
}

/// Key check query parameters.
#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    /// The key code, when not sent in the `X-License-Key` header.
    pub key: Option<String>,
}

/// Key status response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Whether the key is activated, owned by the caller, and has quota left.
    pub valid: bool,
    /// Product tier, when the key resolved.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub product_type: Option<ProductType>,
    /// Remaining quota, when the key resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_remaining: Option<i64>,
}

/// Check one of the caller's keys without consuming quota.
pub async fn check_key(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, ApiError> {
    let key_code = headers
        .get("x-license-key")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .or(query.key)
        .ok_or_else(|| ApiError::BadRequest("missing key".into()))?;

    let Some(key) = state.store.get_key(&key_code, auth.user_id).await? else {
        return Ok(Json(CheckResponse {
            valid: false,
            product_type: None,
            quota_remaining: None,
        }));
    };

    let valid = key.status == KeyStatus::Active
        && key.activated_at.is_some()
        && key.quota_remaining() > 0;
    Ok(Json(CheckResponse {
        valid,
        product_type: Some(key.product_type),
        quota_remaining: Some(key.quota_remaining()),
    }))
}
