use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use bastion_core::ServiceError;
use bastion_observability::HttpMetrics;

use crate::app::adapter::Handler;
use crate::app::dto::{Empty, HealthResponse};
use crate::app::errors::{ApiError, render};
use crate::context::RequestContext;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

pub struct HealthCheck;

#[async_trait]
impl Handler for HealthCheck {
    type Request = Empty;
    type Response = HealthResponse;

    async fn handle(&self, _ctx: RequestContext, _req: Empty) -> anyhow::Result<HealthResponse> {
        Ok(HealthResponse {
            status: "Ok",
            timestamp: Utc::now(),
        })
    }
}

pub async fn metrics(State(metrics): State<Arc<HttpMetrics>>) -> Result<Response, ApiError> {
    let body = metrics
        .encode()
        .map_err(|e| ServiceError::internal(anyhow::anyhow!("encoding metrics: {e}")))?;

    Ok(([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response())
}

pub async fn not_found() -> Response {
    render(ServiceError::not_found("Resource not found"))
}
