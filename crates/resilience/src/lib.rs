//! `bastion-resilience`: request budgets and call protection.
//!
//! Both components are explicit state machines. Rate-limit counters live
//! behind the [`CounterStore`] port so several processes can share them;
//! circuit-breaker counters are always process-local.

pub mod circuit_breaker;
pub mod counter_store;
pub mod rate_limit;

pub use circuit_breaker::{
    BreakerError, BreakerSettings, CircuitBreaker, CircuitState, Counts, StateObserver,
};
pub use counter_store::{CounterStore, CounterStoreError, InMemoryCounterStore, WindowCount};
pub use rate_limit::{RateDecision, RateLimitPolicy, RateLimiter};
