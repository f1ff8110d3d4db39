//! Domain models for GoMapper.

pub mod pin_change;
pub mod project;
pub mod user;
pub mod village;

pub use pin_change::{BatchKind, ChangeKind, PinChange, SnapshotBatch};
pub use project::Project;
pub use user::{Credentials, Identity, User};
pub use village::{
    GeoPoint, Parent, Village, VillageDetails, VillageDocument, VillageStatus,
    VillageValidationError,
};
