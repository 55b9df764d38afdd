//! Selection of the rate-limit counter store.

use std::sync::Arc;

use bastion_resilience::{CounterStore, CounterStoreError, InMemoryCounterStore};

use crate::config::CounterBackend;

/// Open the configured store. A Redis failure is returned, never replaced by
/// process-local counters.
pub async fn connect_counter_store(
    backend: CounterBackend,
    redis_url: &str,
) -> Result<Arc<dyn CounterStore>, CounterStoreError> {
    match backend {
        CounterBackend::Redis => open_redis(redis_url).await,
        CounterBackend::Memory => {
            tracing::warn!("RATE_LIMIT_STORE=memory; rate limits are enforced per process");
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
    }
}

#[cfg(feature = "redis")]
async fn open_redis(redis_url: &str) -> Result<Arc<dyn CounterStore>, CounterStoreError> {
    let store = crate::redis::RedisCounterStore::connect(redis_url).await?;
    tracing::info!("rate-limit counters in redis");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(_redis_url: &str) -> Result<Arc<dyn CounterStore>, CounterStoreError> {
    Err(CounterStoreError::Unavailable(
        "built without the `redis` feature; set RATE_LIMIT_STORE=memory".to_string(),
    ))
}
