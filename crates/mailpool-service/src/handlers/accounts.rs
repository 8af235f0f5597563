//! Account-pool handlers: listing, claims, purchases, family bindings, and
//! inventory import.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailpool_core::{AccountId, AccountStatus, AccountType, FamilyUsage};
use mailpool_store::{AccountFilter, AccountListing, NewAccount};

use crate::auth::{AdminAuth, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;

/// Listing query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Restrict to one allocation kind (`temporary`, `exclusive`, `family`).
    #[serde(rename = "type")]
    pub account_type: Option<String>,
    /// Restrict to one lifecycle status.
    pub status: Option<String>,
}

/// One account in a listing. Credentials are never included here.
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    /// Account id.
    pub id: i64,
    /// Allocation kind.
    #[serde(rename = "type")]
    pub account_type: AccountType,
    /// Primary email address.
    pub email: String,
    /// Lifecycle status.
    pub status: AccountStatus,
    /// When the account entered the pool.
    pub created_at: DateTime<Utc>,
    /// Occupancy, for family accounts with a created group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<FamilyUsage>,
}

impl From<AccountListing> for AccountSummary {
    fn from(listing: AccountListing) -> Self {
        Self {
            id: listing.account.id.as_i64(),
            account_type: listing.account.account_type,
            email: listing.account.email,
            status: listing.account.status,
            created_at: listing.account.created_at,
            family: listing.family,
        }
    }
}

/// List non-retired pool accounts.
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AccountSummary>>, ApiError> {
    let account_type = query
        .account_type
        .as_deref()
        .map(|s| AccountType::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown account type: {s}"))))
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(|s| AccountStatus::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown status: {s}"))))
        .transpose()?;

    let listings = state
        .store
        .list_accounts(AccountFilter {
            account_type,
            status,
        })
        .await?;

    Ok(Json(listings.into_iter().map(Into::into).collect()))
}

/// Claimed-account response: the lease plus the credentials it unlocks.
#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    /// The claimed account's id.
    pub account_id: i64,
    /// Mailbox email.
    pub email: String,
    /// Mailbox password.
    pub password: String,
    /// TOTP secret, if the mailbox has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
    /// When the 24-hour lease lapses.
    pub expires_at: DateTime<Utc>,
}

/// Claim a temporary account for 24 hours.
pub async fn claim_temporary(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let account_id = AccountId::new(id);
    let expires_at = state.store.claim_temporary(account_id, auth.user_id).await?;

    let account = state
        .store
        .get_account(account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("account: {id}")))?;

    Ok(Json(ClaimResponse {
        account_id: id,
        email: account.email,
        password: account.password,
        totp_secret: account.totp_secret,
        expires_at,
    }))
}

/// Return a claimed temporary account to the pool.
pub async fn release_temporary(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .release_temporary(AccountId::new(id), auth.user_id)
        .await?;
    Ok(Json(serde_json::json!({ "released": true })))
}

/// Buy an exclusive account outright.
pub async fn purchase_exclusive(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .purchase_exclusive(AccountId::new(id), auth.user_id, None)
        .await?;
    Ok(Json(serde_json::json!({
        "account_id": id,
        "status": "sold"
    })))
}

/// Family bind request body.
#[derive(Debug, Deserialize)]
pub struct BindRequest {
    /// The member email joining the family.
    pub member_email: String,
    /// The member password, already encrypted by the caller.
    pub member_password: String,
}

/// Bind a member slot in a family account.
pub async fn bind_family(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<BindRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.member_email.is_empty() {
        return Err(ApiError::BadRequest("member_email is required".into()));
    }
    state
        .store
        .bind_family(
            AccountId::new(id),
            auth.user_id,
            &body.member_email,
            &body.member_password,
        )
        .await?;
    Ok(Json(serde_json::json!({ "bound": true })))
}

/// Remove the caller's binding from a family account.
pub async fn unbind_family(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .unbind_family(AccountId::new(id), auth.user_id)
        .await?;
    Ok(Json(serde_json::json!({ "unbound": true })))
}

/// Full credentials for a purchased exclusive account.
#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    /// Mailbox email.
    pub email: String,
    /// Mailbox password.
    pub password: String,
    /// TOTP secret, if the mailbox has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
}

/// Fetch credentials for an exclusive account the caller bought.
pub async fn exclusive_credentials(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<CredentialsResponse>, ApiError> {
    let account = state
        .store
        .exclusive_credentials(AccountId::new(id), auth.user_id)
        .await?;
    Ok(Json(CredentialsResponse {
        email: account.email,
        password: account.password,
        totp_secret: account.totp_secret,
    }))
}

/// One account in an inventory-import request.
#[derive(Debug, Deserialize)]
pub struct ImportAccount {
    /// Allocation kind.
    #[serde(rename = "type")]
    pub account_type: String,
    /// Primary email address.
    pub email: String,
    /// Mailbox password.
    pub password: String,
    /// TOTP secret, if any.
    pub totp_secret: Option<String>,
    /// Import batch label.
    #[serde(default)]
    pub source: String,
}

/// Inventory-import request body.
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    /// Accounts to add to the pool.
    pub accounts: Vec<ImportAccount>,
}

/// Inventory-import response.
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    /// Accounts added.
    pub imported: usize,
    /// Accounts skipped, with reasons.
    pub skipped: Vec<String>,
}

/// Add accounts to the pool (admin only).
pub async fn import_accounts(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Json(body): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let mut imported = 0;
    let mut skipped = Vec::new();

    for entry in body.accounts {
        let Some(account_type) = AccountType::parse(&entry.account_type) else {
            skipped.push(format!("{}: unknown type {}", entry.email, entry.account_type));
            continue;
        };
        match state
            .store
            .insert_account(NewAccount {
                account_type,
                email: entry.email.clone(),
                password: entry.password,
                totp_secret: entry.totp_secret,
                source: entry.source,
            })
            .await
        {
            Ok(_) => imported += 1,
            Err(err) => skipped.push(format!("{}: {err}", entry.email)),
        }
    }

    tracing::info!(imported, skipped = skipped.len(), "inventory import finished");
    Ok(Json(ImportResponse { imported, skipped }))
}
