use axum::http::Extensions;

use bastion_auth::Claims;
use bastion_core::{ServiceError, UserId};

/// Correlation id of a request, echoed in the `X-Request-Id` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity bound by the auth gate after a successful token check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Claims);

/// Per-request context handed to every handler next to its typed request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    request_id: Option<RequestId>,
    identity: Option<Claims>,
}

impl RequestContext {
    pub fn new(request_id: Option<RequestId>, identity: Option<Claims>) -> Self {
        Self {
            request_id,
            identity,
        }
    }

    /// Lift what the middleware chain stored in the request extensions.
    pub fn from_extensions(extensions: &Extensions) -> Self {
        Self {
            request_id: extensions.get::<RequestId>().cloned(),
            identity: extensions
                .get::<AuthenticatedUser>()
                .map(|AuthenticatedUser(claims)| claims.clone()),
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn identity(&self) -> Option<&Claims> {
        self.identity.as_ref()
    }

    /// The caller's claims, or Unauthenticated on a route without the gate.
    pub fn require_identity(&self) -> Result<&Claims, ServiceError> {
        self.identity
            .as_ref()
            .ok_or_else(|| ServiceError::unauthenticated("Authentication required"))
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.identity.as_ref().map(|c| c.user_id)
    }
}
