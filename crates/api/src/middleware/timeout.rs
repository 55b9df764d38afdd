use std::time::Duration;

use axum::{extract::Request, extract::State, middleware::Next, response::Response};

use bastion_core::ServiceError;

use crate::app::errors::render;

pub const TIMEOUT_MESSAGE: &str = "Request timed out";

/// Bound each request to `limit`; an overrun is rendered as a 408 envelope.
pub async fn timeout_middleware(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(path = %path, limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX), "request timed out");
            render(
                ServiceError::timeout(TIMEOUT_MESSAGE)
                    .with_cause(anyhow::anyhow!("no response within {limit:?}")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::{Router, routing::get};
    use tower::ServiceExt;

    fn app(limit: Duration) -> Router {
        Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "done"
                }),
            )
            .route("/fast", get(|| async { "done" }))
            .layer(axum::middleware::from_fn_with_state(limit, timeout_middleware))
    }

    fn get_req(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_renders_timeout_envelope() {
        let response = app(Duration::from_secs(1)).oneshot(get_req("/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "code": "request_timeout",
                "message": TIMEOUT_MESSAGE,
                "details": {},
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn requests_within_the_limit_pass_through() {
        let app = app(Duration::from_secs(10));
        let response = app.clone().oneshot(get_req("/fast")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_req("/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
