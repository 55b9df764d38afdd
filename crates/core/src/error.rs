//! Service error model.
//!
//! A [`ServiceError`] is created once, at the layer that knows what a failure
//! means to a client, and is then propagated unchanged until it is rendered as
//! an [`ErrorEnvelope`] at the transport boundary.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result type used by request handlers.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Canonical classification of a client-visible failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request was malformed or failed validation.
    Validation,
    /// No valid credentials were presented.
    Unauthenticated,
    /// Credentials are valid but the action is not permitted.
    Forbidden,
    /// The addressed resource does not exist.
    NotFound,
    /// The request conflicts with existing state (e.g. duplicate email).
    Conflict,
    /// The request took longer than the server allows.
    Timeout,
    /// The caller exceeded its request budget.
    RateLimited,
    /// A dependency is unavailable (including an open circuit).
    Unavailable,
    /// Anything the server could not classify.
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Timeout => 408,
            Self::RateLimited => 429,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }

    /// Stable machine-readable code rendered in the envelope.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "bad_request",
            Self::Unauthenticated => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Timeout => "request_timeout",
            Self::RateLimited => "too_many_requests",
            Self::Unavailable => "service_unavailable",
            Self::Internal => "internal_server_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Client message used for every internal error.
pub const INTERNAL_MESSAGE: &str = "An internal server error occurred.";

/// A classified failure with a safe client-facing message.
///
/// `cause` is never serialized; `details` always is.
pub struct ServiceError {
    kind: ErrorKind,
    status_code: u16,
    message: String,
    details: Map<String, Value>,
    cause: Option<anyhow::Error>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: kind.status_code(),
            message: message.into(),
            details: Map::new(),
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Wrap an unclassified failure. The client only sees [`INTERNAL_MESSAGE`].
    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::Internal, INTERNAL_MESSAGE).with_cause(cause)
    }

    /// Attach the underlying failure (kept server-side only).
    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Add a structured, client-safe detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Override the status code derived from the kind.
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    /// The client-facing representation.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code().to_string(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl fmt::Debug for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceError")
            .field("kind", &self.kind)
            .field("status_code", &self.status_code)
            .field("message", &self.message)
            .field("details", &self.details)
            .field("cause", &self.cause.as_ref().map(|c| format!("{c:#}")))
            .finish()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {cause:#}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for ServiceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| {
            let source: &(dyn StdError + Send + Sync + 'static) = c.as_ref();
            source as &(dyn StdError + 'static)
        })
    }
}

/// Wire format of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}
