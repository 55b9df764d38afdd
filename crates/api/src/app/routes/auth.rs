//! `/auth/*`: registration, login and token refresh.

use async_trait::async_trait;
use serde::Deserialize;

use bastion_auth::{AuthError, AuthService, Registration, TokenError};
use bastion_core::ServiceError;

use crate::app::adapter::{Created, Handler};
use crate::app::dto::{AuthResponse, TokensResponse};
use crate::context::RequestContext;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if !is_plausible_email(&self.email) {
            return Err(ServiceError::validation("Invalid email address").with_detail("field", "email"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            ))
            .with_detail("field", "password"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `local@domain.tld` with no whitespace.
fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Map failures shared by every auth flow.
fn auth_failure(err: AuthError) -> ServiceError {
    match err {
        AuthError::InvalidCredentials => ServiceError::unauthenticated("Invalid email or password"),
        AuthError::UserNotActive => ServiceError::forbidden("User account is not active"),
        AuthError::EmailTaken => ServiceError::conflict("User with this email already exists"),
        AuthError::UserNotFound => ServiceError::not_found("User not found"),
        other => ServiceError::internal(other),
    }
}

fn refresh_failure(err: AuthError) -> ServiceError {
    match err {
        AuthError::Token(TokenError::Expired) => {
            ServiceError::unauthenticated("Refresh token has expired")
        }
        AuthError::Token(TokenError::Signing(_)) => ServiceError::internal(err),
        AuthError::Token(_) | AuthError::InvalidCredentials => {
            ServiceError::unauthenticated("Invalid refresh token")
        }
        other => auth_failure(other),
    }
}

pub struct Register {
    pub auth: AuthService,
}

#[async_trait]
impl Handler for Register {
    type Request = RegisterRequest;
    type Response = Created<AuthResponse>;

    async fn handle(&self, _ctx: RequestContext, req: RegisterRequest) -> anyhow::Result<Created<AuthResponse>> {
        req.validate()?;

        let (user, tokens) = self
            .auth
            .register(Registration {
                email: req.email,
                password: req.password,
                first_name: req.first_name,
                last_name: req.last_name,
            })
            .await
            .map_err(auth_failure)?;

        Ok(Created(AuthResponse { user, tokens }))
    }
}

pub struct Login {
    pub auth: AuthService,
}

#[async_trait]
impl Handler for Login {
    type Request = LoginRequest;
    type Response = AuthResponse;

    async fn handle(&self, _ctx: RequestContext, req: LoginRequest) -> anyhow::Result<AuthResponse> {
        let (user, tokens) = self
            .auth
            .login(&req.email, &req.password)
            .await
            .map_err(auth_failure)?;

        Ok(AuthResponse { user, tokens })
    }
}

pub struct Refresh {
    pub auth: AuthService,
}

#[async_trait]
impl Handler for Refresh {
    type Request = RefreshRequest;
    type Response = TokensResponse;

    async fn handle(&self, _ctx: RequestContext, req: RefreshRequest) -> anyhow::Result<TokensResponse> {
        let tokens = self
            .auth
            .refresh(&req.refresh_token)
            .await
            .map_err(refresh_failure)?;

        Ok(TokensResponse { tokens })
    }
}
