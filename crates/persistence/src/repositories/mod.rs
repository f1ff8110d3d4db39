//! Repository implementations for database operations.

pub mod pin;
pub mod project;
pub mod user;

pub use pin::PinRepository;
pub use project::ProjectRepository;
pub use user::UserRepository;
