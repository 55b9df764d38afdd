//! Registration, login and refresh flows.

use std::sync::Arc;

use thiserror::Error;

use bastion_core::UserId;

use crate::claims::TokenType;
use crate::password::{PasswordError, hash_password_blocking, verify_password_blocking};
use crate::token::{TokenError, TokenManager, TokenPair};
use crate::user::{NewUser, RepositoryError, User, UserRepository};

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email, wrong password, or a refresh token for a vanished user.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user account is not active")]
    UserNotActive,

    #[error("email is already registered")]
    EmailTaken,

    #[error("user not found")]
    UserNotFound,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Repository(RepositoryError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl From<RepositoryError> for AuthError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::AlreadyExists => Self::EmailTaken,
            RepositoryError::NotFound => Self::UserNotFound,
            other => Self::Repository(other),
        }
    }
}

/// Input to [`AuthService::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Trim and lowercase an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Authentication flows over an identity store and a token manager.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<TokenManager>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, tokens: Arc<TokenManager>) -> Self {
        Self { users, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    /// Create an active account and issue its first token pair.
    pub async fn register(&self, registration: Registration) -> Result<(User, TokenPair), AuthError> {
        let password_hash = hash_password_blocking(registration.password).await?;

        let user = self
            .users
            .create(NewUser {
                email: normalize_email(&registration.email),
                password_hash,
                first_name: registration.first_name,
                last_name: registration.last_name,
            })
            .await?;

        let tokens = self.tokens.generate_token_pair(user.id, &user.email)?;
        tracing::info!(user_id = %user.id, "user registered");
        Ok((user, tokens))
    }

    /// Exchange credentials for a token pair.
    ///
    /// The password is checked before the active flag, so an inactive account
    /// is only revealed to a caller who knows its password.
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, TokenPair), AuthError> {
        let user = match self.users.get_by_email(&normalize_email(email)).await {
            Ok(user) => user,
            Err(RepositoryError::NotFound) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        let verified =
            verify_password_blocking(password.to_string(), user.password_hash.clone()).await?;
        if !verified {
            tracing::debug!(user_id = %user.id, "login rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(AuthError::UserNotActive);
        }

        let tokens = self.tokens.generate_token_pair(user.id, &user.email)?;
        tracing::info!(user_id = %user.id, "user logged in");
        Ok((user, tokens))
    }

    /// Issue a new pair for the holder of a valid refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.tokens.validate_token(refresh_token, TokenType::Refresh)?;

        let user = match self.users.get_by_id(claims.user_id).await {
            Ok(user) => user,
            Err(RepositoryError::NotFound) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        if !user.is_active {
            return Err(AuthError::UserNotActive);
        }

        Ok(self.tokens.generate_token_pair(user.id, &user.email)?)
    }

    pub async fn user(&self, id: UserId) -> Result<User, AuthError> {
        Ok(self.users.get_by_id(id).await?)
    }
}

impl core::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthService")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryUserRepository;
    use crate::token::{DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL};
    use chrono::{Duration, Utc};

    fn service() -> AuthService {
        AuthService::new(
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(TokenManager::new(b"secret", DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL)),
        )
    }

    fn registration(email: &str) -> Registration {
        Registration {
            email: email.to_string(),
            password: "password1".to_string(),
            first_name: None,
            last_name: None,
        }
    }

    #[tokio::test]
    async fn register_normalizes_email_and_issues_tokens() {
        let svc = service();
        let (user, tokens) = svc.register(registration("  A@B.com ")).await.unwrap();

        assert_eq!(user.email, "a@b.com");
        assert!(user.is_active);
        let claims = svc
            .tokens()
            .validate_token(&tokens.access_token, TokenType::Access)
            .unwrap();
        assert_eq!(claims.user_id, user.id);
    }

    #[tokio::test]
    async fn duplicate_registration_is_email_taken() {
        let svc = service();
        svc.register(registration("a@b.com")).await.unwrap();

        let err = svc.register(registration("A@b.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn login_rejects_unknown_email_and_wrong_password_alike() {
        let svc = service();
        svc.register(registration("a@b.com")).await.unwrap();

        assert!(matches!(
            svc.login("nobody@b.com", "password1").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            svc.login("a@b.com", "wrong-password").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(svc.login("A@B.COM", "password1").await.is_ok());
    }

    #[tokio::test]
    async fn inactive_accounts_cannot_login_or_refresh() {
        let svc = service();
        let (mut user, tokens) = svc.register(registration("a@b.com")).await.unwrap();

        user.is_active = false;
        svc.users().update(&user).await.unwrap();

        assert!(matches!(
            svc.login("a@b.com", "password1").await,
            Err(AuthError::UserNotActive)
        ));
        assert!(matches!(
            svc.refresh(&tokens.refresh_token).await,
            Err(AuthError::UserNotActive)
        ));
    }

    #[tokio::test]
    async fn refresh_requires_a_refresh_token_for_an_existing_user() {
        let svc = service();
        let (user, tokens) = svc.register(registration("a@b.com")).await.unwrap();

        let pair = svc.refresh(&tokens.refresh_token).await.unwrap();
        assert!(svc.tokens().validate_token(&pair.access_token, TokenType::Access).is_ok());

        assert!(matches!(
            svc.refresh(&tokens.access_token).await,
            Err(AuthError::Token(TokenError::WrongType { .. }))
        ));

        svc.users().delete(user.id).await.unwrap();
        assert!(matches!(
            svc.refresh(&tokens.refresh_token).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn expired_refresh_token_is_reported_as_expired() {
        let svc = service();
        let (user, _) = svc.register(registration("a@b.com")).await.unwrap();
        let stale = svc
            .tokens()
            .generate_token_pair_at(user.id, &user.email, Utc::now() - Duration::days(8))
            .unwrap();

        assert!(matches!(
            svc.refresh(&stale.refresh_token).await,
            Err(AuthError::Token(TokenError::Expired))
        ));
    }

    #[tokio::test]
    async fn user_lookup_maps_missing_to_user_not_found() {
        let svc = service();
        assert!(matches!(
            svc.user(UserId::new(42)).await,
            Err(AuthError::UserNotFound)
        ));
    }
}
