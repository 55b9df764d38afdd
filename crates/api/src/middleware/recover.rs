use std::any::Any;

use axum::response::Response;

use bastion_core::ServiceError;

use crate::app::errors::render;

/// Panic handler for `tower_http::catch_panic::CatchPanicLayer::custom`.
///
/// The client gets the internal envelope plus a `panic_value` detail.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let panic_value = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic_value = %panic_value, "handler panicked");

    render(
        ServiceError::internal(anyhow::anyhow!("panic: {panic_value}"))
            .with_detail("panic_value", panic_value),
    )
}
