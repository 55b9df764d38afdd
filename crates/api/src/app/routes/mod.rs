//! HTTP routes, one file per area.

pub mod auth;
pub mod circuit_breaker;
pub mod profile;
pub mod system;
