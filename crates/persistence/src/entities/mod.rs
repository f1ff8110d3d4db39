//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod pin;
pub mod project;
pub mod user;

pub use pin::{PinEntity, PinWriteEntity};
pub use project::{ProjectEntity, ProjectWithCountEntity};
pub use user::{UserEntity, UserSessionEntity};
