//! Watermarks and tombstones.

use crate::entity::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far a project has been synced.
///
/// Advanced only when a sync session ends successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWatermark {
    /// Time of the last completed sync.
    pub last_sync: DateTime<Utc>,
    /// Highest entity ID known at the last completed sync.
    pub last_id: i32,
}

impl SyncWatermark {
    /// Creates a watermark.
    pub fn new(last_sync: DateTime<Utc>, last_id: i32) -> Self {
        Self { last_sync, last_id }
    }
}

impl Default for SyncWatermark {
    fn default() -> Self {
        Self {
            last_sync: DateTime::<Utc>::UNIX_EPOCH,
            last_id: 0,
        }
    }
}

/// Record of a deleted entity, kept so late clients learn of the deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    /// ID of the deleted entity.
    pub id: i32,
    /// Its type at deletion time.
    pub entity_type: EntityType,
    /// When it was deleted on the server.
    pub deleted_at: DateTime<Utc>,
}

impl Tombstone {
    /// Creates a tombstone.
    pub fn new(id: i32, entity_type: EntityType, deleted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            entity_type,
            deleted_at,
        }
    }

    /// Returns true if the deletion happened after the given watermark.
    pub fn is_after(&self, watermark: &SyncWatermark) -> bool {
        self.deleted_at > watermark.last_sync
    }
}
