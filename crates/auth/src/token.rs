//! Signed token issuance and validation.
//!
//! Tokens are HS256 JWTs carrying [`Claims`]. The manager is stateless: the
//! same secret and clock always produce the same verdict for a given token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use bastion_core::UserId;

use crate::claims::{Claims, TokenType, TokenValidationError, validate_claims};

/// Default lifetime of access tokens.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default lifetime of refresh tokens.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Access and refresh token issued together for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not a decodable token, wrong algorithm, or an unusable time window.
    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("expected {expected} token, got {actual}")]
    WrongType {
        expected: TokenType,
        actual: TokenType,
    },

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<TokenValidationError> for TokenError {
    fn from(value: TokenValidationError) -> Self {
        match value {
            TokenValidationError::Expired => Self::Expired,
            TokenValidationError::NotYetValid | TokenValidationError::InvalidTimeWindow => {
                Self::Malformed
            }
        }
    }
}

/// Issues and validates signed identity tokens.
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenManager {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn generate_token_pair(&self, user_id: UserId, email: &str) -> Result<TokenPair, TokenError> {
        self.generate_token_pair_at(user_id, email, Utc::now())
    }

    pub fn generate_token_pair_at(
        &self,
        user_id: UserId,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let access_token =
            self.generate_token_at(user_id, email, TokenType::Access, self.access_ttl, now)?;
        let refresh_token =
            self.generate_token_at(user_id, email, TokenType::Refresh, self.refresh_ttl, now)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Sign a single token of the given type and lifetime.
    pub fn generate_token_at(
        &self,
        user_id: UserId,
        email: &str,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|e| TokenError::Signing(e.to_string()))?;
        if ttl_secs <= 0 {
            return Err(TokenError::Signing("token ttl must be at least one second".to_string()));
        }

        let claims = Claims {
            user_id,
            email: email.to_string(),
            token_type,
            jti: Uuid::now_v7().to_string(),
            iat,
            nbf: iat,
            exp: iat.saturating_add(ttl_secs),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn validate_token(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        self.validate_token_at(token, expected, Utc::now())
    }

    /// Verify the signature, then the time window at `now`, then the type.
    pub fn validate_token_at(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let claims = self.verify_signature(token)?;
        validate_claims(&claims, now)?;

        if claims.token_type != expected {
            return Err(TokenError::WrongType {
                expected,
                actual: claims.token_type,
            });
        }

        Ok(claims)
    }

    fn verify_signature(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run against the caller's clock in `validate_claims`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::InvalidSignature => TokenError::InvalidSignature,
                JwtErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })
    }
}

impl core::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenManager")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}
