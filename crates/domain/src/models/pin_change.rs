//! Deltas delivered by a pin subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::village::Village;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Removed => write!(f, "removed"),
        }
    }
}

/// One change to one pin.
///
/// `version` is assigned by the store and strictly increases across writes
/// to the same pin. `payload` is the full document for `added`, a full or
/// partial document for `modified`, and absent for `removed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinChange {
    pub kind: ChangeKind,
    pub pin_id: String,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl PinChange {
    pub fn added(village: &Village, version: i64) -> Self {
        Self {
            kind: ChangeKind::Added,
            pin_id: village.id.clone(),
            version,
            payload: Some(village.to_json()),
        }
    }

    pub fn modified(village: &Village, version: i64) -> Self {
        Self {
            kind: ChangeKind::Modified,
            pin_id: village.id.clone(),
            version,
            payload: Some(village.to_json()),
        }
    }

    /// A `modified` change carrying only the listed fields.
    pub fn patch(pin_id: impl Into<String>, fields: Value, version: i64) -> Self {
        Self {
            kind: ChangeKind::Modified,
            pin_id: pin_id.into(),
            version,
            payload: Some(fields),
        }
    }

    pub fn removed(pin_id: impl Into<String>, version: i64) -> Self {
        Self {
            kind: ChangeKind::Removed,
            pin_id: pin_id.into(),
            version,
            payload: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Full replacement of the project's pin set.
    Initial,
    Delta,
}

/// Changes delivered together, in store order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBatch {
    pub kind: BatchKind,
    pub changes: Vec<PinChange>,
}

impl SnapshotBatch {
    pub fn initial(changes: Vec<PinChange>) -> Self {
        Self {
            kind: BatchKind::Initial,
            changes,
        }
    }

    pub fn delta(changes: Vec<PinChange>) -> Self {
        Self {
            kind: BatchKind::Delta,
            changes,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.kind == BatchKind::Initial
    }
}
