//! Domain layer for GoMapper.
//!
//! This crate contains:
//! - Domain models (Village, Parent, Project, Identity, PinChange)
//! - The remote pin store contract and its in-process implementation
//! - Client core services: reconciliation, project sync, map search,
//!   session state and shell composition

pub mod models;
pub mod services;
