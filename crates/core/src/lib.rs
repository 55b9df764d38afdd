//! `bastion-core`: shared building blocks for every other crate.
//!
//! This crate contains the canonical error model and identifiers; it has no
//! transport or storage concerns.

pub mod error;
pub mod id;

pub use error::{ErrorEnvelope, ErrorKind, INTERNAL_MESSAGE, ServiceError, ServiceResult};
pub use id::{IdParseError, UserId};
