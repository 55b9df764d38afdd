use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, header},
    middleware::Next,
    response::Response,
};

use bastion_core::ServiceError;
use bastion_observability::HttpMetrics;
use bastion_resilience::{RateDecision, RateLimiter};

use crate::app::errors::render;
use crate::context::AuthenticatedUser;
use crate::middleware::client_ip::client_ip;

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// How a request maps to a counter key.
#[derive(Clone)]
pub enum RateLimitKey {
    ClientIp,
    /// Authenticated user id, falling back to the client ip.
    Identity,
    Custom(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl RateLimitKey {
    fn key_for(&self, req: &Request) -> String {
        match self {
            Self::ClientIp => client_ip(req),
            Self::Identity => match req.extensions().get::<AuthenticatedUser>() {
                Some(AuthenticatedUser(claims)) => format!("user:{}", claims.user_id),
                None => format!("ip:{}", client_ip(req)),
            },
            Self::Custom(f) => f(req),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitState {
    limiter: RateLimiter,
    key: RateLimitKey,
    skip_paths: Arc<[String]>,
    metrics: Option<Arc<HttpMetrics>>,
}

impl RateLimitState {
    pub fn new(limiter: RateLimiter, key: RateLimitKey) -> Self {
        Self {
            limiter,
            key,
            skip_paths: Arc::from(Vec::new()),
            metrics: None,
        }
    }

    /// Requests to these exact paths bypass the limiter.
    pub fn with_skip_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.skip_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<HttpMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if state.skip_paths.iter().any(|skip| skip == path) {
        return next.run(req).await;
    }

    let key = state.key.key_for(&req);
    let decision = match state.limiter.check(&key).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(limiter = state.limiter.name(), error = %e, "rate limit store failure");
            return render(ServiceError::internal(e));
        }
    };

    let max = state.limiter.policy().max;
    match decision {
        RateDecision::Allowed {
            remaining,
            resets_in,
            ..
        } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(max));
            headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
            headers.insert(RESET_HEADER, HeaderValue::from(ceil_secs(resets_in)));
            response
        }
        RateDecision::Limited { count, retry_after } => {
            let retry_after_secs = ceil_secs(retry_after);
            tracing::warn!(
                limiter = state.limiter.name(),
                key = %key,
                path = %req.uri().path(),
                count,
                max,
                "rate limit exceeded"
            );
            if let Some(metrics) = &state.metrics {
                metrics.record_rate_limit(state.limiter.name());
            }

            let mut response = render(
                ServiceError::rate_limited(RATE_LIMIT_MESSAGE)
                    .with_detail("retry_after_secs", retry_after_secs),
            );
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            headers.insert(LIMIT_HEADER, HeaderValue::from(max));
            headers.insert(REMAINING_HEADER, HeaderValue::from(0u64));
            response
        }
    }
}

/// Whole seconds, rounded up, never zero.
fn ceil_secs(d: std::time::Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
