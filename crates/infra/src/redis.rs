//! Redis-backed counting store for rate limiting.
//!
//! The increment, first-hit expiry and TTL read run in one Lua script, so a
//! crash or a concurrent caller can never leave a counter without an expiry.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};

use bastion_resilience::{CounterStore, CounterStoreError, WindowCount};

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Shared counters in Redis. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    script: Script,
}

impl RedisCounterStore {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: &str) -> Result<Self, CounterStoreError> {
        let client =
            Client::open(redis_url).map_err(|e| CounterStoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, CounterStoreError> {
        let window_ms = i64::try_from(window.as_millis())
            .map_err(|e| CounterStoreError::InvalidReply(e.to_string()))?
            .max(1);

        let mut conn = self.conn.clone();
        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?;

        let count = u64::try_from(count)
            .map_err(|_| CounterStoreError::InvalidReply(format!("negative count {count}")))?;
        let resets_in = Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0));

        Ok(WindowCount { count, resets_in })
    }
}

impl core::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Needs a running Redis; set `REDIS_URL` and run with `--ignored`.
    #[tokio::test]
    #[ignore]
    async fn increments_share_a_window() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisCounterStore::connect(&url).await.unwrap();
        let key = format!("ratelimit:test:{}", std::process::id());
        let window = Duration::from_secs(60);

        let first = store.increment(&key, window).await.unwrap();
        let second = store.increment(&key, window).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.resets_in <= window);
        assert!(second.resets_in > Duration::ZERO);
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let result = RedisCounterStore::connect("redis://127.0.0.1:1").await;
        assert!(matches!(result, Err(CounterStoreError::Unavailable(_))));
    }
}
