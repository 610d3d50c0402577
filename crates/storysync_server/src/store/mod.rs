//! Entity persistence.
//!
//! An [`EntityStore`] holds, per project, the current version of every
//! entity together with its hash, the sync watermark and the tombstones of
//! deleted entities. Stores do not enforce sync rules; the repository does.
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral servers
//! - [`FileStore`] - JSON documents under a data directory

#[cfg(test)]
pub(crate) mod conformance;
mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use storysync_protocol::{
    EntityHash, EntityType, ProjectEntity, ProjectKey, ProtocolError, SyncWatermark, Tombstone,
};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored data failed an integrity check.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store's data directory.
    #[error("store directory is locked by another process")]
    Locked,
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<ProtocolError> for StoreError {
    fn from(err: ProtocolError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// An entity as persisted by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntity {
    /// The entity.
    pub entity: ProjectEntity,
    /// Hash of `entity`.
    pub hash: EntityHash,
    /// When the server last accepted a write of this entity.
    pub updated_at: DateTime<Utc>,
}

impl StoredEntity {
    /// Wraps an entity, computing its hash.
    pub fn new(entity: ProjectEntity, updated_at: DateTime<Utc>) -> StoreResult<Self> {
        let hash = EntityHash::of(&entity)?;
        Ok(Self {
            entity,
            hash,
            updated_at,
        })
    }

    /// Returns the entity ID.
    pub fn id(&self) -> i32 {
        self.entity.id()
    }

    /// Returns the entity type.
    pub fn entity_type(&self) -> EntityType {
        self.entity.entity_type()
    }
}

/// Persistence for project entities and sync bookkeeping.
///
/// # Invariants
///
/// - `put` followed by `get` returns the same [`StoredEntity`]
/// - `add_tombstone` replaces any tombstone with the same ID
/// - A project that has never been written has the default watermark and
///   no entities or tombstones
/// - Stores must be `Send + Sync`; callers serialize writes per entity
pub trait EntityStore: Send + Sync {
    /// Returns true if the project exists.
    fn project_exists(&self, key: &ProjectKey) -> StoreResult<bool>;

    /// Creates an empty project. Creating an existing project is a no-op.
    fn create_project(&self, key: &ProjectKey) -> StoreResult<()>;

    /// Reads an entity by type and ID.
    fn get(
        &self,
        key: &ProjectKey,
        entity_type: EntityType,
        id: i32,
    ) -> StoreResult<Option<StoredEntity>>;

    /// Writes an entity, replacing any entity of the same type and ID.
    fn put(&self, key: &ProjectKey, stored: &StoredEntity) -> StoreResult<()>;

    /// Deletes an entity. Returns false if it did not exist.
    fn delete(&self, key: &ProjectKey, entity_type: EntityType, id: i32) -> StoreResult<bool>;

    /// Returns the type of the entity stored under `id`, if any.
    fn find_type(&self, key: &ProjectKey, id: i32) -> StoreResult<Option<EntityType>>;

    /// Lists the entities written after `since`.
    fn changed_since(
        &self,
        key: &ProjectKey,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<(EntityType, i32)>>;

    /// Returns the highest stored entity ID, or 0 for an empty project.
    fn max_id(&self, key: &ProjectKey) -> StoreResult<i32>;

    /// Loads the project's watermark.
    fn load_watermark(&self, key: &ProjectKey) -> StoreResult<SyncWatermark>;

    /// Saves the project's watermark.
    fn save_watermark(&self, key: &ProjectKey, watermark: &SyncWatermark) -> StoreResult<()>;

    /// Records a deletion.
    fn add_tombstone(&self, key: &ProjectKey, tombstone: Tombstone) -> StoreResult<()>;

    /// Lists tombstones with `deleted_at` after `since`, ordered by ID.
    fn tombstones_since(
        &self,
        key: &ProjectKey,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Tombstone>>;

    /// Removes the tombstone for `id`. Returns false if there was none.
    fn clear_tombstone(&self, key: &ProjectKey, id: i32) -> StoreResult<bool>;

    /// Removes tombstones with `deleted_at` before `cutoff`. Returns the count.
    fn purge_tombstones(&self, key: &ProjectKey, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Reads the entity stored under `id`, whatever its type.
    fn find(&self, key: &ProjectKey, id: i32) -> StoreResult<Option<StoredEntity>> {
        match self.find_type(key, id)? {
            Some(entity_type) => self.get(key, entity_type, id),
            None => Ok(None),
        }
    }
}
