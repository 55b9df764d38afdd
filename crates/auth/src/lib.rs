//! `bastion-auth`: identity tokens, credentials and the authentication flows.
//!
//! Decoupled from HTTP: the api crate maps these errors onto the service
//! error model.

pub mod claims;
pub mod in_memory;
pub mod password;
pub mod service;
pub mod token;
pub mod user;

pub use claims::{Claims, TokenType, TokenValidationError, validate_claims};
pub use in_memory::InMemoryUserRepository;
pub use password::{
    PasswordError, hash_password, hash_password_blocking, verify_password, verify_password_blocking,
};
pub use service::{AuthError, AuthService, Registration, normalize_email};
pub use token::{DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL, TokenError, TokenManager, TokenPair};
pub use user::{NewUser, RepositoryError, User, UserRepository};
