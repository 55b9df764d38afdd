//! Infrastructure layer: configuration and store adapters.

pub mod config;

/// Rate-limit counter store selection.
pub mod counters;

/// Redis adapters (shared rate-limit counters).
#[cfg(feature = "redis")]
pub mod redis;

/// Database adapters (identity store).
pub mod db;

pub use config::{AppConfig, ConfigError, CounterBackend, DEFAULT_REDIS_URL};
pub use counters::connect_counter_store;
