//! Protocol messages for sync.
//!
//! Routes live under `/project/{userId}/{projectName}`; the constants below
//! name the headers, query parameters and form fields those routes use.

use crate::bookkeeping::Tombstone;
use crate::hash::EntityHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the sync session ID.
pub const HEADER_SYNC_ID: &str = "x-sync-id";
/// Header carrying the server hash the client last saw, on upload.
pub const HEADER_ORIGINAL_HASH: &str = "x-original-entity-hash";
/// Header carrying the client's current hash on download, and the server
/// hash on a download response.
pub const HEADER_ENTITY_HASH: &str = "x-entity-hash";
/// Header carrying the entity type discriminator.
pub const HEADER_ENTITY_TYPE: &str = "x-entity-type";
/// Query parameter that bypasses conflict detection on upload.
pub const QUERY_FORCE: &str = "force";
/// Form field with the client's last-sync claim on end of sync.
pub const FORM_LAST_SYNC: &str = "lastSync";
/// Form field with the client's last-id claim on end of sync.
pub const FORM_LAST_ID: &str = "lastId";
/// Query or form field with the time of the client's own last completed sync,
/// on begin and end of sync. Changes and tombstones are reported from there.
pub const FORM_SINCE: &str = "since";

/// Response to `begin_sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginSyncResponse {
    /// Session token to present on every following request.
    pub sync_id: String,
    /// Time of the last completed sync.
    pub last_sync: DateTime<Utc>,
    /// Highest entity ID the server knows of.
    pub last_id: i32,
    /// Server clock at session start.
    pub server_time: DateTime<Utc>,
    /// IDs of entities updated since `last_sync`.
    #[serde(default)]
    pub changed_ids: Vec<i32>,
    /// IDs of entities deleted since `last_sync`.
    #[serde(default)]
    pub deleted_ids: Vec<i32>,
}

/// Response to `end_sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSyncResponse {
    /// Whether the watermark was committed.
    pub success: bool,
    /// Committed last-sync time.
    pub last_sync: DateTime<Utc>,
    /// Committed last ID.
    pub last_id: i32,
    /// Deletions the client had not yet observed.
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
}

/// Response to a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntityResponse {
    /// The server's hash of the stored entity.
    pub hash: EntityHash,
}

/// Response to a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEntityResponse {
    /// True if an entity was removed; false if none existed.
    pub deleted: bool,
}

/// Error body returned with every non-success status except conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Machine-checkable error kind.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
