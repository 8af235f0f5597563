//! The quota-gated email classifier.
//!
//! Each successful call costs one quota unit on the presented license key;
//! the gate in [`crate::gate`] handles key resolution and consumption.

use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use mailpool_core::LicenseKey;

use crate::error::ApiError;

const FREE_PROVIDERS: &[&str] = &[
    "gmail.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "qq.com",
    "163.com",
    "126.com",
    "icloud.com",
    "proton.me",
];

const ROLE_LOCALS: &[&str] = &[
    "admin", "info", "support", "sales", "contact", "noreply", "no-reply", "postmaster",
    "webmaster", "abuse",
];

/// Classification request body.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// The address to classify.
    pub email: String,
}

/// Classification result.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// Whether the address is syntactically plausible.
    pub valid: bool,
    /// `free`, `role`, or `business`; absent for invalid addresses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
    /// Quota left on the key after this call.
    pub quota_remaining: i64,
}

/// Classify an email address.
pub async fn verify_email(
    Extension(key): Extension<LicenseKey>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let label = classify(&body.email);
    Ok(Json(VerifyResponse {
        valid: label.is_some(),
        label,
        // The gate consumes one unit after this handler succeeds.
        quota_remaining: key.quota_remaining().saturating_sub(1),
    }))
}

fn classify(email: &str) -> Option<&'static str> {
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }
    if email.chars().any(char::is_whitespace) {
        return None;
    }

    let domain = domain.to_ascii_lowercase();
    if FREE_PROVIDERS.contains(&domain.as_str()) {
        return Some("free");
    }
    let local = local.to_ascii_lowercase();
    if ROLE_LOCALS.contains(&local.as_str()) {
        return Some("role");
    }
    Some("business")
}
