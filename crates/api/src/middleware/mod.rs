//! Request middleware, listed outermost first as layered by `build_app`:
//! request id, client address, panic recovery, global rate limit, metrics,
//! logging, timeout.
//! The auth gate and per-endpoint limiters are attached to individual routes.

pub mod auth;
pub mod client_ip;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod recover;
pub mod request_id;
pub mod timeout;

pub use auth::{AuthRejection, AuthState, UNAUTHENTICATED_MESSAGE, auth_middleware, extract_bearer};
pub use client_ip::{ClientIp, TrustedProxies, client_ip, client_ip_middleware};
pub use logging::logging_middleware;
pub use metrics::metrics_middleware;
pub use rate_limit::{RateLimitKey, RateLimitState, rate_limit_middleware};
pub use recover::handle_panic;
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
pub use timeout::{TIMEOUT_MESSAGE, timeout_middleware};
