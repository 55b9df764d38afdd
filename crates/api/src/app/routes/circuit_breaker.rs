//! `GET /circuit-breaker-example`: a flaky upstream behind a circuit breaker.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use bastion_core::ServiceError;
use bastion_resilience::CircuitBreaker;

use crate::app::adapter::Handler;
use crate::app::dto::{BreakerResponse, Empty};
use crate::context::RequestContext;

/// An unreliable dependency.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn call(&self) -> anyhow::Result<String>;
}

/// Fails at random with probability `failure_rate`.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedUpstream {
    failure_rate: f64,
}

impl SimulatedUpstream {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedUpstream {
    fn default() -> Self {
        Self::new(0.3)
    }
}

#[async_trait]
impl Upstream for SimulatedUpstream {
    async fn call(&self) -> anyhow::Result<String> {
        let failed = rand::thread_rng().gen_bool(self.failure_rate);
        if failed {
            anyhow::bail!("simulated upstream failure");
        }
        Ok("Service call successful".to_string())
    }
}

pub struct CircuitBreakerExample {
    pub breaker: Arc<CircuitBreaker>,
    pub upstream: Arc<dyn Upstream>,
}

#[async_trait]
impl Handler for CircuitBreakerExample {
    type Request = Empty;
    type Response = BreakerResponse;

    async fn handle(&self, _ctx: RequestContext, _req: Empty) -> anyhow::Result<BreakerResponse> {
        match self.breaker.execute(|| self.upstream.call()).await {
            Ok(message) => Ok(BreakerResponse {
                message,
                circuit_breaker: self.breaker.state(),
            }),
            Err(err) => {
                tracing::warn!(breaker = self.breaker.name(), error = %err, "protected call failed");
                Err(ServiceError::unavailable("Service temporarily unavailable")
                    .with_cause(anyhow::anyhow!("{err}"))
                    .with_detail("circuit_breaker", self.breaker.state().as_str())
                    .into())
            }
        }
    }
}
