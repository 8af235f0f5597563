//! Error types for mailpool storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// Variants are grouped by the HTTP class the service maps them to:
/// `NotFound` → 404, the conflict family → 409, the entitlement family → 403,
/// `Database` → 500.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record that was missing.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The account exists but is not claimable or purchasable right now.
    #[error("account is not available")]
    AccountUnavailable,

    /// The family group has no free member slots.
    #[error("family group is full")]
    FamilyGroupFull,

    /// The user already holds a binding in this family group.
    #[error("already bound to this family group")]
    AlreadyBound,

    /// Payment is not in the state the transition requires.
    #[error("payment is not pending (status: {status})")]
    InvalidPaymentState {
        /// The status the payment was actually in.
        status: String,
    },

    /// The pending order lapsed before the callback arrived.
    #[error("order expired")]
    OrderExpired,

    /// Order-number collision on insert; the caller should regenerate and retry.
    #[error("duplicate order number: {order_no}")]
    DuplicateOrderNo {
        /// The colliding order number.
        order_no: String,
    },

    /// The key was already activated by a different user.
    #[error("key activated by another user")]
    ActivatedByOther,

    /// The key has been administratively revoked.
    #[error("key revoked")]
    KeyRevoked,

    /// The key's quota is fully consumed.
    #[error("key quota exhausted")]
    KeyExhausted,

    /// The caller holds no purchase record for the account.
    #[error("no purchase record for this account")]
    NoPurchase,

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}
