//! # Purchase Rate Limiting
//!
//! Fixed-window quota on booster purchases per user. This only reduces abuse
//! pressure; double-spend protection is the ledger's job.
//!
//! The counters live behind [`RateLimitStore`] so several service instances
//! can share one store. [`InMemoryRateLimitStore`] is the process-local
//! implementation.

use booster_shared::UserId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{EconomyError, EconomyResult};

/// Quota settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Purchases allowed per window. Zero disables the limiter.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 10, window_secs: 3_600 }
    }
}

impl RateLimitConfig {
    /// Window length in milliseconds.
    #[must_use]
    pub const fn window_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1_000)
    }
}

/// Counter storage for the rate limiter.
pub trait RateLimitStore: Send + Sync {
    /// Increments the counter for `user` in the window starting at
    /// `window_start_ms` and returns the new count. A counter from an older
    /// window is discarded first.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the store is unreachable.
    fn increment(&self, user: UserId, window_start_ms: u64) -> EconomyResult<u32>;
}

/// Process-local counter store.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    // user -> (window start, count)
    counters: Mutex<HashMap<UserId, (u64, u32)>>,
}

impl InMemoryRateLimitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops counters from windows older than `window_start_ms`.
    pub fn purge_before(&self, window_start_ms: u64) {
        self.counters.lock().retain(|_, (start, _)| *start >= window_start_ms);
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn increment(&self, user: UserId, window_start_ms: u64) -> EconomyResult<u32> {
        let mut counters = self.counters.lock();
        let entry = counters.entry(user).or_insert((window_start_ms, 0));
        if entry.0 != window_start_ms {
            *entry = (window_start_ms, 0);
        }
        entry.1 = entry.1.saturating_add(1);
        Ok(entry.1)
    }
}

/// Applies a [`RateLimitConfig`] over a store.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Box<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig, store: Box<dyn RateLimitStore>) -> Self {
        Self { config, store }
    }

    /// Creates a limiter backed by an [`InMemoryRateLimitStore`].
    #[must_use]
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(config, Box::new(InMemoryRateLimitStore::new()))
    }

    /// Quota settings.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one request at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` once the user exceeds the quota for the current
    /// window, or the store's error.
    pub fn check(&self, user: UserId, now_ms: u64) -> EconomyResult<()> {
        let window_ms = self.config.window_ms();
        if self.config.max_requests == 0 || window_ms == 0 {
            return Ok(());
        }

        let window_start = now_ms - now_ms % window_ms;
        let count = self.store.increment(user, window_start)?;
        if count > self.config.max_requests {
            let retry_after_ms = window_start + window_ms - now_ms;
            warn!(user, count, retry_after_ms, "purchase rate limited");
            return Err(EconomyError::RateLimited { retry_after_ms });
        }
        Ok(())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_per_window() {
        let limiter = RateLimiter::in_memory(RateLimitConfig { max_requests: 3, window_secs: 60 });

        for _ in 0..3 {
            limiter.check(1, 1_000).unwrap();
        }
        assert_eq!(limiter.check(1, 1_500), Err(EconomyError::RateLimited { retry_after_ms: 58_500 }));

        // Other users are counted separately.
        limiter.check(2, 1_500).unwrap();

        // Next window resets.
        limiter.check(1, 60_000).unwrap();
    }

    #[test]
    fn test_zero_disables() {
        let limiter = RateLimiter::in_memory(RateLimitConfig { max_requests: 0, window_secs: 60 });
        for _ in 0..100 {
            limiter.check(1, 0).unwrap();
        }
    }

    #[test]
    fn test_purge() {
        let store = InMemoryRateLimitStore::new();
        store.increment(1, 0).unwrap();
        store.increment(2, 60_000).unwrap();
        store.purge_before(60_000);
        assert_eq!(store.counters.lock().len(), 1);
    }

    #[test]
    fn test_default_matches_hourly_quota() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 10);
        assert_eq!(config.window_ms(), 3_600_000);
    }
}
