//! Counting-store port and a process-local implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

/// Result of one atomic increment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WindowCount {
    /// Count after this increment, including it.
    pub count: u64,
    /// Time until the current window expires.
    pub resets_in: Duration,
}

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store returned an invalid reply: {0}")]
    InvalidReply(String),
}

/// Atomic increment-with-expiry.
///
/// The first increment of a key, or the first after its window expired,
/// starts a new window of length `window` with a count of 1.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, CounterStoreError>;
}

/// Expired windows are swept once the map grows past this many keys.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// Counts kept in this process only; limits are not shared between replicas.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, CounterStoreError> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| CounterStoreError::Unavailable("counter map lock poisoned".to_string()))?;

        if windows.len() >= SWEEP_THRESHOLD {
            windows.retain(|_, w| w.expires_at > now);
        }

        let entry = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if w.expires_at <= now {
                    *w = Window {
                        count: 0,
                        expires_at: now + window,
                    };
                }
            })
            .or_insert(Window {
                count: 0,
                expires_at: now + window,
            });
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            resets_in: entry.expires_at.saturating_duration_since(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counts_within_a_window_then_resets() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(60);

        assert_eq!(store.increment("k", window).await.unwrap().count, 1);
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = store.increment("k", window).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.resets_in, Duration::from_secs(50));

        tokio::time::advance(Duration::from_secs(50)).await;
        let fresh = store.increment("k", window).await.unwrap();
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.resets_in, window);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(1);

        store.increment("a", window).await.unwrap();
        store.increment("a", window).await.unwrap();
        assert_eq!(store.increment("b", window).await.unwrap().count, 1);
    }
}
