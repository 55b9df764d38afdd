//! Identity records and the store port they live behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bastion_core::UserId;

/// A registered account.
///
/// `password_hash` is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an account. The store assigns the id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("user not found")]
    NotFound,

    #[error("user already exists")]
    AlreadyExists,

    #[error("user store failure: {0}")]
    Backend(String),
}

/// Identity store port.
///
/// Emails are compared exactly; callers normalize them before storing or
/// looking them up.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new active user. Fails with `AlreadyExists` on a duplicate email.
    async fn create(&self, new_user: NewUser) -> Result<User, RepositoryError>;

    async fn get_by_id(&self, id: UserId) -> Result<User, RepositoryError>;

    async fn get_by_email(&self, email: &str) -> Result<User, RepositoryError>;

    /// Persist every mutable field of `user` and bump `updated_at`.
    async fn update(&self, user: &User) -> Result<User, RepositoryError>;

    async fn delete(&self, id: UserId) -> Result<(), RepositoryError>;
}
