//! Application services.

pub mod auth;

pub use auth::{AuthResult, AuthService, AuthServiceError, TokenPair};
