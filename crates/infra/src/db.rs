//! Postgres-backed identity store.
//!
//! ## Error Mapping
//!
//! | SQLx Error                         | RepositoryError |
//! |------------------------------------|-----------------|
//! | Database, code `23505` (unique)    | `AlreadyExists` |
//! | RowNotFound                        | `NotFound`      |
//! | anything else                      | `Backend`       |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;

use bastion_auth::{NewUser, RepositoryError, User, UserRepository};
use bastion_core::UserId;

use crate::config::DatabaseConfig;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            BIGSERIAL PRIMARY KEY,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    first_name    TEXT,
    last_name     TEXT,
    is_active     BOOLEAN NOT NULL DEFAULT TRUE,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, is_active, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresUserRepository {
    pool: Arc<PgPool>,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool for `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `users` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    #[instrument(skip(self, new_user), err)]
    async fn create(&self, new_user: NewUser) -> Result<User, RepositoryError> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (email, password_hash, first_name, last_name) \
             VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}"
        ))
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        user_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&self, id: UserId) -> Result<User, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
            .bind(id.get())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_id", e))?;

        user_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn get_by_email(&self, email: &str) -> Result<User, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_email", e))?;

        user_from_row(&row)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn update(&self, user: &User) -> Result<User, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE users SET email = $2, password_hash = $3, first_name = $4, \
             last_name = $5, is_active = $6, updated_at = now() \
             WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(user.id.get())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_active)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        user_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> Result<User, RepositoryError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode", e);
    Ok(User {
        id: UserId::new(row.try_get("id").map_err(get)?),
        email: row.try_get("email").map_err(get)?,
        password_hash: row.try_get("password_hash").map_err(get)?,
        first_name: row.try_get("first_name").map_err(get)?,
        last_name: row.try_get("last_name").map_err(get)?,
        is_active: row.try_get("is_active").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db_err) if is_unique_violation(db_err.code().as_deref()) => {
            RepositoryError::AlreadyExists
        }
        other => RepositoryError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Postgres `unique_violation`.
fn is_unique_violation(code: Option<&str>) -> bool {
    code == Some("23505")
}
