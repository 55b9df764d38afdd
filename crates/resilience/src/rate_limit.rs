//! Fixed-window rate limiting over a shared counting store.

use std::sync::Arc;
use std::time::Duration;

use crate::counter_store::{CounterStore, CounterStoreError};

/// How many requests a key may make per window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(max: u64, window: Duration) -> Self {
        Self { max, window }
    }

    pub const fn per_minute(max: u64) -> Self {
        Self::new(max, Duration::from_secs(60))
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        count: u64,
        remaining: u64,
        resets_in: Duration,
    },
    Limited {
        count: u64,
        retry_after: Duration,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// A named limiter instance.
///
/// The name namespaces keys in the store, so two limiters never share a
/// counter even when they see the same client key.
#[derive(Clone)]
pub struct RateLimiter {
    name: Arc<str>,
    policy: RateLimitPolicy,
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(name: impl Into<Arc<str>>, policy: RateLimitPolicy, store: Arc<dyn CounterStore>) -> Self {
        Self {
            name: name.into(),
            policy,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn store_key(&self, key: &str) -> String {
        format!("ratelimit:{}:{key}", self.name)
    }

    /// Count one request for `key` and decide whether it may proceed.
    ///
    /// Rejected requests still consume the increment. Store failures are
    /// returned, never converted into an allow.
    pub async fn check(&self, key: &str) -> Result<RateDecision, CounterStoreError> {
        let window = self
            .store
            .increment(&self.store_key(key), self.policy.window)
            .await?;

        if window.count > self.policy.max {
            tracing::debug!(
                limiter = %self.name,
                key = key,
                count = window.count,
                max = self.policy.max,
                "rate limit exceeded"
            );
            return Ok(RateDecision::Limited {
                count: window.count,
                retry_after: window.resets_in,
            });
        }

        Ok(RateDecision::Allowed {
            count: window.count,
            remaining: self.policy.max - window.count,
            resets_in: window.resets_in,
        })
    }
}

impl core::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
