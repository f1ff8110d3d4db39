//! HTTP route handlers.

pub mod auth;
pub mod frontend;
pub mod health;
pub mod insights;
pub mod pins;
pub mod projects;
pub mod shell;
