use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

use bastion_observability::HttpMetrics;

/// Label used when no route matched, to bound label cardinality.
const UNMATCHED_PATH: &str = "unmatched";

pub async fn metrics_middleware(
    State(metrics): State<Arc<HttpMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    let start = Instant::now();
    let _in_flight = InFlight::start(metrics.clone());
    let response = next.run(req).await;

    metrics.record_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Keeps the in-flight gauge balanced even if the request future is dropped.
struct InFlight(Arc<HttpMetrics>);

impl InFlight {
    fn start(metrics: Arc<HttpMetrics>) -> Self {
        metrics.request_started();
        Self(metrics)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.request_finished();
    }
}
