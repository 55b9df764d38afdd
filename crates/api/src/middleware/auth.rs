use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use thiserror::Error;

use bastion_auth::{Claims, TokenError, TokenManager, TokenType};
use bastion_core::ServiceError;

use crate::app::errors::render;
use crate::context::AuthenticatedUser;

/// The only message a rejected caller ever sees.
pub const UNAUTHENTICATED_MESSAGE: &str = "Invalid or missing credentials";

#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenManager>,
}

/// Why the gate rejected a request. Logged and attached to the response
/// extensions, never rendered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("missing authorization header")]
    MissingHeader,

    #[error("authorization header is not valid UTF-8")]
    InvalidHeader,

    #[error("authorization scheme is not Bearer")]
    UnsupportedScheme,

    #[error("empty bearer token")]
    EmptyToken,

    #[error(transparent)]
    Token(#[from] TokenError),
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&state.tokens, req.headers()) {
        Ok(claims) => {
            req.extensions_mut().insert(AuthenticatedUser(claims));
            next.run(req).await
        }
        Err(rejection) => {
            tracing::debug!(reason = %rejection, path = %req.uri().path(), "request rejected by auth gate");
            let mut response = render(ServiceError::unauthenticated(UNAUTHENTICATED_MESSAGE));
            response.extensions_mut().insert(rejection);
            response
        }
    }
}

fn authenticate(tokens: &TokenManager, headers: &HeaderMap) -> Result<Claims, AuthRejection> {
    let token = extract_bearer(headers)?;
    Ok(tokens.validate_token(token, TokenType::Access)?)
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthRejection> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AuthRejection::MissingHeader)?;

    let header = header.to_str().map_err(|_| AuthRejection::InvalidHeader)?.trim();

    let (scheme, token) = match header.split_once(' ') {
        Some(parts) => parts,
        None if header.eq_ignore_ascii_case("bearer") => return Err(AuthRejection::EmptyToken),
        None => return Err(AuthRejection::UnsupportedScheme),
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthRejection::UnsupportedScheme);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthRejection::EmptyToken);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{StatusCode, header::AUTHORIZATION};
    use axum::{Extension, Router, routing::get};
    use bastion_auth::{DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL};
    use bastion_core::UserId;
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_tokens() {
        assert_eq!(extract_bearer(&headers("Bearer abc")), Ok("abc"));
        assert_eq!(extract_bearer(&headers("bearer  abc ")), Ok("abc"));
        assert_eq!(extract_bearer(&HeaderMap::new()), Err(AuthRejection::MissingHeader));
        assert_eq!(extract_bearer(&headers("Basic dXNlcg==")), Err(AuthRejection::UnsupportedScheme));
        assert_eq!(extract_bearer(&headers("Bearer")), Err(AuthRejection::EmptyToken));
        assert_eq!(extract_bearer(&headers("Token")), Err(AuthRejection::UnsupportedScheme));
    }

    fn tokens() -> Arc<TokenManager> {
        Arc::new(TokenManager::new(b"gate-secret", DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL))
    }

    fn app(tokens: Arc<TokenManager>) -> Router {
        Router::new()
            .route(
                "/me",
                get(|Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>| async move {
                    claims.email
                }),
            )
            .route_layer(axum::middleware::from_fn_with_state(
                AuthState { tokens },
                auth_middleware,
            ))
    }

    async fn call(tokens: Arc<TokenManager>, auth: Option<String>) -> Response {
        let mut req = axum::http::Request::get("/me");
        if let Some(auth) = auth {
            req = req.header(AUTHORIZATION, auth);
        }
        app(tokens).oneshot(req.body(Body::empty()).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn valid_access_token_binds_identity() {
        let tokens = tokens();
        let pair = tokens.generate_token_pair(UserId::new(3), "a@b.com").unwrap();

        let response = call(tokens, Some(format!("Bearer {}", pair.access_token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"a@b.com");
    }

    #[tokio::test]
    async fn every_failure_looks_the_same_to_the_client() {
        let tokens = tokens();
        let pair = tokens.generate_token_pair(UserId::new(3), "a@b.com").unwrap();
        let expired = tokens
            .generate_token_pair_at(UserId::new(3), "a@b.com", Utc::now() - Duration::hours(1))
            .unwrap();

        let cases = [
            (None, AuthRejection::MissingHeader),
            (Some("Bearer garbage".to_string()), AuthRejection::Token(TokenError::Malformed)),
            (
                Some(format!("Bearer {}", expired.access_token)),
                AuthRejection::Token(TokenError::Expired),
            ),
            (
                Some(format!("Bearer {}", pair.refresh_token)),
                AuthRejection::Token(TokenError::WrongType {
                    expected: TokenType::Access,
                    actual: TokenType::Refresh,
                }),
            ),
        ];

        for (auth, reason) in cases {
            let response = call(tokens.clone(), auth).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(response.extensions().get::<AuthRejection>(), Some(&reason));

            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["code"], "unauthorized");
            assert_eq!(body["message"], UNAUTHENTICATED_MESSAGE);
        }
    }
}
