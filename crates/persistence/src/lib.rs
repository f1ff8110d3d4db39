//! Persistence layer for GoMapper.
//!
//! This crate contains:
//! - Database connection management and migrations
//! - Entity definitions (database row mappings)
//! - Repository implementations
//! - The PostgreSQL-backed pin store

pub mod db;
pub mod entities;
pub mod metrics;
pub mod pin_store;
pub mod repositories;

pub use pin_store::PgPinStore;
