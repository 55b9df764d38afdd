//! Process-local identity store for development and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use bastion_core::UserId;

use crate::user::{NewUser, RepositoryError, User, UserRepository};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    users: HashMap<UserId, User>,
}

/// In-memory `UserRepository`.
///
/// Ids are assigned sequentially from 1.
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    inner: RwLock<Inner>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> RepositoryError {
        RepositoryError::Backend("in-memory user store lock poisoned".to_string())
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, new_user: NewUser) -> Result<User, RepositoryError> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;

        if inner.users.values().any(|u| u.email == new_user.email) {
            return Err(RepositoryError::AlreadyExists);
        }

        inner.next_id += 1;
        let now = Utc::now();
        let user = User {
            id: UserId::new(inner.next_id),
            email: new_user.email,
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: UserId) -> Result<User, RepositoryError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        inner.users.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, RepositoryError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        inner
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn update(&self, user: &User) -> Result<User, RepositoryError> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;

        if inner
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(RepositoryError::AlreadyExists);
        }

        let stored = inner.users.get_mut(&user.id).ok_or(RepositoryError::NotFound)?;
        *stored = User {
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, id: UserId) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        inner
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}
