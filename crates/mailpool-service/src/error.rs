//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use mailpool_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but no entitlement.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the resource is taken or the state transition is invalid.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Wrong login credentials; carries the attempts left before a block.
    #[error("invalid credentials")]
    InvalidCredentials {
        /// Failed attempts still allowed from this client.
        remaining_attempts: u32,
    },

    /// Too many failed login attempts from this client.
    #[error("too many attempts, retry in {retry_after_seconds}s")]
    TooManyRequests {
        /// Seconds until the block lifts.
        retry_after_seconds: u64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::InvalidCredentials { remaining_attempts } => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                self.to_string(),
                Some(serde_json::json!({
                    "remaining_attempts": remaining_attempts
                })),
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::TooManyRequests {
                retry_after_seconds,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                self.to_string(),
                Some(serde_json::json!({
                    "retry_after_seconds": retry_after_seconds
                })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity}: {id}")),
            StoreError::AccountUnavailable
            | StoreError::FamilyGroupFull
            | StoreError::AlreadyBound
            | StoreError::InvalidPaymentState { .. }
            | StoreError::OrderExpired => Self::Conflict(err.to_string()),
            StoreError::ActivatedByOther
            | StoreError::KeyRevoked
            | StoreError::KeyExhausted
            | StoreError::NoPurchase => Self::Forbidden(err.to_string()),
            // Order-number collisions are retried by the handler; one leaking
            // through means the retry also collided.
            StoreError::DuplicateOrderNo { .. } | StoreError::Database(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_http_classes() {
        let conflict: ApiError = StoreError::AccountUnavailable.into();
        assert!(matches!(conflict, ApiError::Conflict(_)));

        let forbidden: ApiError = StoreError::KeyRevoked.into();
        assert!(matches!(forbidden, ApiError::Forbidden(_)));

        let not_found: ApiError = StoreError::NotFound {
            entity: "account",
            id: "9".into(),
        }
        .into();
        assert!(matches!(not_found, ApiError::NotFound(_)));
    }
}
