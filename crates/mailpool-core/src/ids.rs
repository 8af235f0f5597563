//! Identifier types for mailpool.
//!
//! All primary keys are database-assigned 64-bit integers. The `int_id_type!`
//! macro generates the newtype wrappers so every identifier gets the same
//! serialization, parsing, and display behavior.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macro to define an integer-backed identifier type with standard trait
/// implementations.
///
/// Generates a newtype wrapper around `i64` with:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (as a JSON number)
/// - `FromStr`, `Display`, `Debug`
macro_rules! int_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Create an identifier from a raw database value.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Return the raw database value.
            #[must_use]
            pub const fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map(Self).map_err(|_| IdError::NotAnInteger)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

int_id_type!(UserId, "A user identifier.\n\nUser IDs are assigned by the external identity store and arrive in JWT claims.");
int_id_type!(AccountId, "A pool-account identifier.");
int_id_type!(PaymentId, "A payment (order) identifier.");
int_id_type!(KeyId, "A license-key identifier.");
int_id_type!(GroupId, "A family-group identifier.");

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid integer.
    #[error("identifier is not an integer")]
    NotAnInteger,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_roundtrip() {
        let id = UserId::new(42);
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn account_id_serde_json() {
        let id = AccountId::new(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let parsed: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn bad_id_rejected() {
        assert_eq!("seven".parse::<AccountId>(), Err(IdError::NotAnInteger));
    }
}
