//! Shared utilities and common types for the GoMapper backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Token fingerprinting for stored sessions
//! - JWT session tokens
//! - Password hashing with Argon2id
//! - Coordinate, date and document-id validation

pub mod crypto;
pub mod jwt;
pub mod password;
pub mod validation;
