//! Pin entities (database row mappings).

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

use domain::models::{ChangeKind, PinChange, Village, VillageValidationError};

/// Database row mapping for the pins table.
#[derive(Debug, Clone, FromRow)]
pub struct PinEntity {
    pub project_id: String,
    pub pin_id: String,
    pub document: Json<Value>,
    pub version: i64,
    /// Set on tombstones.
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PinEntity {
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The row as a snapshot entry: an unvalidated `added` change for a live
    /// pin, a `removed` change at the deletion version for a tombstone.
    pub fn into_change(self) -> PinChange {
        if self.is_tombstone() {
            return PinChange::removed(self.pin_id, self.version);
        }
        PinChange {
            kind: ChangeKind::Added,
            pin_id: self.pin_id,
            version: self.version,
            payload: Some(self.document.0),
        }
    }
}

impl TryFrom<PinEntity> for Village {
    type Error = VillageValidationError;

    fn try_from(entity: PinEntity) -> Result<Self, Self::Error> {
        Village::from_json(&entity.pin_id, entity.document.0)
    }
}

/// Result of an upsert: the assigned version and whether the row is new.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct PinWriteEntity {
    pub version: i64,
    pub inserted: bool,
}

impl PinWriteEntity {
    pub fn change_kind(&self) -> ChangeKind {
        if self.inserted {
            ChangeKind::Added
        } else {
            ChangeKind::Modified
        }
    }
}
