//! Response bodies shared by the route handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bastion_auth::{TokenPair, User};
use bastion_core::UserId;
use bastion_resilience::CircuitState;

use crate::app::adapter::ApiResponse;

/// For handlers that take no input.
#[derive(Debug, Default, Deserialize)]
pub struct Empty {}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub tokens: TokenPair,
}

impl ApiResponse for AuthResponse {}

#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub tokens: TokenPair,
}

impl ApiResponse for TokensResponse {}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: UserId,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl ApiResponse for ProfileResponse {}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl ApiResponse for HealthResponse {}

#[derive(Debug, Serialize)]
pub struct BreakerResponse {
    pub message: String,
    pub circuit_breaker: CircuitState,
}

impl ApiResponse for BreakerResponse {}
