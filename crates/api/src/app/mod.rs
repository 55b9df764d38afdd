//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `adapter.rs`: typed `Handler` trait and request binding
//! - `routes/`: HTTP handlers (one file per area)
//! - `dto.rs`: response bodies
//! - `errors.rs`: error envelope rendering

use std::sync::Arc;

use axum::{Router, middleware::from_fn, middleware::from_fn_with_state, routing::get};
use tower_http::catch_panic::CatchPanicLayer;

use bastion_auth::{AuthService, InMemoryUserRepository, TokenManager, UserRepository};
use bastion_infra::AppConfig;
use bastion_observability::HttpMetrics;
use bastion_resilience::{
    BreakerSettings, CircuitBreaker, CircuitState, CounterStore, InMemoryCounterStore,
    RateLimiter,
};

use crate::middleware::{
    self, AuthState, RateLimitKey, RateLimitState, TrustedProxies, auth_middleware,
    rate_limit_middleware,
};

use routes::auth::{Login, Refresh, Register};
use routes::circuit_breaker::{CircuitBreakerExample, SimulatedUpstream, Upstream};
use routes::profile::Profile;
use routes::system::{self, HealthCheck};

pub mod adapter;
pub mod dto;
pub mod errors;
pub mod routes;

pub const CIRCUIT_BREAKER_EXAMPLE: &str = "circuit-breaker-example";

/// Everything the router needs from the outside world.
#[derive(Clone)]
pub struct AppDependencies {
    pub config: AppConfig,
    pub tokens: Arc<TokenManager>,
    pub users: Arc<dyn UserRepository>,
    pub counters: Arc<dyn CounterStore>,
    pub metrics: Arc<HttpMetrics>,
    pub upstream: Arc<dyn Upstream>,
}

impl AppDependencies {
    /// Process-local stores, for development and tests.
    pub fn in_memory(config: AppConfig, secret: &[u8]) -> Self {
        let tokens = TokenManager::new(secret, config.jwt.access_ttl, config.jwt.refresh_ttl);
        Self {
            config,
            tokens: Arc::new(tokens),
            users: Arc::new(InMemoryUserRepository::new()),
            counters: Arc::new(InMemoryCounterStore::new()),
            metrics: Arc::new(HttpMetrics::new()),
            upstream: Arc::new(SimulatedUpstream::default()),
        }
    }
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(deps: AppDependencies) -> Router {
    let AppDependencies {
        config,
        tokens,
        users,
        counters,
        metrics,
        upstream,
    } = deps;

    let auth = AuthService::new(users, tokens.clone());
    let auth_state = AuthState { tokens };

    let transitions = metrics.clone();
    let breaker = CircuitBreaker::new(BreakerSettings {
        name: CIRCUIT_BREAKER_EXAMPLE.to_string(),
        ..config.breaker.clone()
    })
    .with_observer(Arc::new(move |name: &str, from: CircuitState, to: CircuitState| {
        tracing::warn!(breaker = name, from = %from, to = %to, "circuit breaker transition");
        transitions.record_breaker_transition(name, to.as_str());
    }));

    let healthcheck_limit = RateLimitState::new(
        RateLimiter::new("healthcheck", config.rate_limit.healthcheck, counters.clone()),
        RateLimitKey::ClientIp,
    )
    .with_metrics(metrics.clone());

    // Protected routes: require a valid access token.
    let api = Router::new()
        .route("/profile", adapter::get(Profile { auth: auth.clone() }))
        .route_layer(from_fn_with_state(auth_state, auth_middleware));

    let mut router = Router::new()
        .route(
            "/healthcheck",
            adapter::get(HealthCheck).layer(from_fn_with_state(healthcheck_limit, rate_limit_middleware)),
        )
        .route("/auth/register", adapter::post(Register { auth: auth.clone() }))
        .route("/auth/login", adapter::post(Login { auth: auth.clone() }))
        .route("/auth/refresh", adapter::post(Refresh { auth }))
        .route(
            "/circuit-breaker-example",
            adapter::get(CircuitBreakerExample {
                breaker: Arc::new(breaker),
                upstream,
            }),
        )
        .route("/metrics", get(system::metrics).with_state(metrics.clone()))
        .nest("/api", api)
        .fallback(system::not_found)
        // Layers run outermost-last: timeout is innermost.
        .layer(from_fn_with_state(
            config.server.request_timeout,
            middleware::timeout_middleware,
        ))
        .layer(from_fn(middleware::logging_middleware))
        .layer(from_fn_with_state(metrics.clone(), middleware::metrics_middleware));

    if config.rate_limit.enabled {
        let global_limit = RateLimitState::new(
            RateLimiter::new("global", config.rate_limit.global, counters),
            RateLimitKey::ClientIp,
        )
        .with_skip_paths(["/metrics"])
        .with_metrics(metrics);
        router = router.layer(from_fn_with_state(global_limit, rate_limit_middleware));
    }

    let trusted = TrustedProxies::new(config.server.trusted_proxies.iter().copied());
    router
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .layer(from_fn_with_state(trusted, middleware::client_ip_middleware))
        .layer(from_fn(middleware::request_id_middleware))
}
