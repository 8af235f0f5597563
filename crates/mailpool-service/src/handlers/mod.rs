//! API handlers.

pub mod accounts;
pub mod health;
pub mod payments;
pub mod session;
pub mod subscriptions;
pub mod verify;
