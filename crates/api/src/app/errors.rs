//! Boundary rendering of [`ServiceError`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use bastion_core::{ErrorKind, ServiceError};

/// Attached to every rendered error response for outer middleware (logging).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub code: &'static str,
    /// Internal cause chain; never sent to the client.
    pub cause: Option<String>,
}

/// Render `err` as `{code, message, details}` with its status code.
pub fn render(err: ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = (status, Json(err.envelope())).into_response();
    response.extensions_mut().insert(ErrorReport {
        kind: err.kind(),
        code: err.code(),
        cause: err.cause().map(|c| format!("{c:#}")),
    });
    response
}

/// Recover a `ServiceError` from a handler failure, or classify it as internal.
pub fn classify(err: anyhow::Error) -> ServiceError {
    match err.downcast::<ServiceError>() {
        Ok(service_error) => service_error,
        Err(other) => ServiceError::internal(other),
    }
}

/// `IntoResponse` wrapper for plain axum handlers.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        Self(value)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self(classify(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        render(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use bastion_core::INTERNAL_MESSAGE;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn renders_envelope_and_report() {
        let response = render(ServiceError::conflict("taken").with_detail("field", "email"));

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let report = response.extensions().get::<ErrorReport>().cloned().unwrap();
        assert_eq!(report.code, "conflict");
        assert!(report.cause.is_none());

        assert_eq!(
            body_json(response).await,
            serde_json::json!({"code": "conflict", "message": "taken", "details": {"field": "email"}})
        );
    }

    #[tokio::test]
    async fn unclassified_errors_become_internal() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("disk on fire"));
        let service_error = classify(err.context("saving").unwrap_err());

        assert_eq!(service_error.kind(), ErrorKind::Internal);
        let response = render(service_error);
        let report = response.extensions().get::<ErrorReport>().cloned().unwrap();
        assert!(report.cause.unwrap().contains("disk on fire"));

        let body = body_json(response).await;
        assert_eq!(body["message"], INTERNAL_MESSAGE);
        assert_eq!(body["details"], serde_json::json!({}));
    }

    #[test]
    fn wrapped_service_errors_pass_through_unchanged() {
        let err = anyhow::Error::new(ServiceError::not_found("User not found")).context("profile");
        let service_error = classify(err);
        assert_eq!(service_error.kind(), ErrorKind::NotFound);
        assert_eq!(service_error.message(), "User not found");
    }
}
