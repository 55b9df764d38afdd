use std::time::Instant;

use axum::{
    extract::Request,
    http::header::USER_AGENT,
    middleware::Next,
    response::Response,
};

use crate::app::errors::ErrorReport;
use crate::context::RequestId;
use crate::middleware::client_ip::client_ip;

/// Paths that are never logged.
const QUIET_PATHS: &[&str] = &["/metrics"];

/// One event per request; level follows the status class.
pub async fn logging_middleware(req: Request, next: Next) -> Response {
    if QUIET_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let ip = client_ip(&req);
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(ToString::to_string)
        .unwrap_or_default();

    let response = next.run(req).await;

    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    let status = response.status().as_u16();
    let report = response.extensions().get::<ErrorReport>();
    let error_code = report.map(|r| r.code).unwrap_or_default();
    let error_cause = report.and_then(|r| r.cause.as_deref()).unwrap_or_default();

    macro_rules! log_request {
        ($level:ident) => {
            tracing::$level!(
                method = %method,
                path = %path,
                status,
                duration_ms,
                ip = %ip,
                user_agent = %user_agent,
                request_id = %request_id,
                error_code,
                error_cause,
                "request completed"
            )
        };
    }

    match status {
        500.. => log_request!(error),
        400..=499 => log_request!(warn),
        _ => log_request!(info),
    }

    response
}
