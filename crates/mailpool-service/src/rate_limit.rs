//! Per-client login rate limiting.
//!
//! Tracks failed login attempts per client IP: 5 failures inside a 10-minute
//! window block the client for 15 minutes. A successful login clears the
//! client's entry. The limiter lives in [`crate::state::AppState`] and is
//! consulted only by the token endpoint.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Failures allowed inside one window before the client is blocked.
pub const MAX_ATTEMPTS: u32 = 5;

/// The sliding window over which failures are counted.
pub const ATTEMPT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// How long a block lasts once triggered.
pub const BLOCK_DURATION: Duration = Duration::from_secs(15 * 60);

/// Entry count past which stale entries are purged on the next write.
const PURGE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u32,
    first_try: Instant,
    blocked_at: Option<Instant>,
}

impl Entry {
    fn is_stale(&self, now: Instant) -> bool {
        match self.blocked_at {
            Some(blocked_at) => now.duration_since(blocked_at) >= BLOCK_DURATION,
            None => now.duration_since(self.first_try) >= ATTEMPT_WINDOW,
        }
    }
}

/// Per-client failed-login tracker.
#[derive(Debug, Default)]
pub struct LoginRateLimiter {
    entries: RwLock<HashMap<String, Entry>>,
}

impl LoginRateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the client may attempt a login now.
    ///
    /// # Errors
    ///
    /// Returns the seconds until the block lifts when the client is blocked.
    pub fn check(&self, client: &str) -> Result<(), u64> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Result<(), u64> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(entry) = entries.get(client) else {
            return Ok(());
        };
        if let Some(blocked_at) = entry.blocked_at {
            let elapsed = now.duration_since(blocked_at);
            if elapsed < BLOCK_DURATION {
                return Err((BLOCK_DURATION - elapsed).as_secs().max(1));
            }
        }
        Ok(())
    }

    /// Record a failed attempt from the client.
    pub fn record_failure(&self, client: &str) {
        self.record_failure_at(client, Instant::now());
    }

    fn record_failure_at(&self, client: &str, now: Instant) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Bounded growth: shed lapsed entries once the table gets large.
        if entries.len() >= PURGE_THRESHOLD {
            entries.retain(|_, e| !e.is_stale(now));
        }

        let entry = entries.entry(client.to_string()).or_insert(Entry {
            count: 0,
            first_try: now,
            blocked_at: None,
        });

        if entry.is_stale(now) {
            *entry = Entry {
                count: 0,
                first_try: now,
                blocked_at: None,
            };
        }

        entry.count += 1;
        if entry.count >= MAX_ATTEMPTS && entry.blocked_at.is_none() {
            entry.blocked_at = Some(now);
            tracing::warn!(client, attempts = entry.count, "login client blocked");
        }
    }

    /// Clear the client's entry after a successful login.
    pub fn record_success(&self, client: &str) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.remove(client);
    }

    /// Failed attempts still allowed before the client gets blocked.
    #[must_use]
    pub fn remaining_attempts(&self, client: &str) -> u32 {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        match entries.get(client) {
            Some(entry) if entry.blocked_at.is_some() => 0,
            Some(entry) => MAX_ATTEMPTS.saturating_sub(entry.count),
            None => MAX_ATTEMPTS,
        }
    }
}
