//! Client-side project state.

use crate::error::SyncResult;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use storysync_protocol::{EntityHash, ProjectEntity, SyncWatermark};

/// A locally modified entity waiting for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyEntity {
    /// The local version.
    pub entity: ProjectEntity,
    /// Server hash the local copy was last synced at; `None` if the server
    /// has never seen it.
    pub server_hash: Option<EntityHash>,
}

/// The client's copy of a project, as seen by the sync engine.
///
/// Implementations decide how entities are persisted; the engine only
/// needs to know what changed locally and where to put what changed
/// remotely.
pub trait LocalProject: Send + Sync {
    /// Returns every entity edited since it was last synced.
    fn dirty_entities(&self) -> SyncResult<Vec<DirtyEntity>>;

    /// Returns the IDs of entities deleted locally but not yet on the server.
    fn pending_deletions(&self) -> SyncResult<Vec<i32>>;

    /// Returns the IDs of all local entities.
    fn entity_ids(&self) -> SyncResult<Vec<i32>>;

    /// Returns the server hash an entity was last synced at.
    fn server_hash(&self, id: i32) -> SyncResult<Option<EntityHash>>;

    /// Returns true if the entity has unsynced local edits.
    fn is_dirty(&self, id: i32) -> SyncResult<bool>;

    /// Stores a server version and marks it clean.
    fn store_entity(&self, entity: ProjectEntity, server_hash: EntityHash) -> SyncResult<()>;

    /// Removes an entity deleted on the server.
    fn remove_entity(&self, id: i32) -> SyncResult<()>;

    /// Marks an uploaded entity clean at the server's hash.
    fn mark_clean(&self, id: i32, server_hash: EntityHash) -> SyncResult<()>;

    /// Forgets a pushed deletion.
    fn clear_deletion(&self, id: i32) -> SyncResult<()>;

    /// Returns the highest local entity ID, 0 if none.
    fn max_id(&self) -> SyncResult<i32>;

    /// Returns the watermark of the last completed sync.
    fn sync_marker(&self) -> SyncResult<Option<SyncWatermark>>;

    /// Stores the watermark of a completed sync.
    fn save_sync_marker(&self, marker: SyncWatermark) -> SyncResult<()>;
}

#[derive(Debug, Clone)]
struct LocalEntry {
    entity: ProjectEntity,
    server_hash: Option<EntityHash>,
    dirty: bool,
}

#[derive(Debug, Default)]
struct LocalState {
    entities: BTreeMap<i32, LocalEntry>,
    deletions: BTreeSet<i32>,
    marker: Option<SyncWatermark>,
}

/// An in-memory local project.
///
/// The editing methods ([`edit`](Self::edit), [`delete`](Self::delete))
/// stand in for the application.
#[derive(Debug, Default)]
pub struct MemoryLocalProject {
    state: RwLock<LocalState>,
}

impl MemoryLocalProject {
    /// Creates an empty project.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces an entity as a local edit.
    pub fn edit(&self, entity: ProjectEntity) {
        let mut state = self.state.write();
        let id = entity.id();
        state.deletions.remove(&id);
        let server_hash = state.entities.get(&id).and_then(|e| e.server_hash);
        state.entities.insert(
            id,
            LocalEntry {
                entity,
                server_hash,
                dirty: true,
            },
        );
    }

    /// Deletes an entity locally. Returns false if it did not exist.
    ///
    /// The deletion is pushed on the next sync if the server knew the entity.
    pub fn delete(&self, id: i32) -> bool {
        let mut state = self.state.write();
        match state.entities.remove(&id) {
            Some(entry) => {
                if entry.server_hash.is_some() {
                    state.deletions.insert(id);
                }
                true
            }
            None => false,
        }
    }

    /// Returns an entity.
    pub fn get(&self, id: i32) -> Option<ProjectEntity> {
        self.state.read().entities.get(&id).map(|e| e.entity.clone())
    }

    /// Returns the next free ID above both local entities and `server_last_id`.
    pub fn next_id(&self, server_last_id: i32) -> i32 {
        let local = self
            .state
            .read()
            .entities
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0);
        local.max(server_last_id) + 1
    }

    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Returns true if there are no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalProject for MemoryLocalProject {
    fn dirty_entities(&self) -> SyncResult<Vec<DirtyEntity>> {
        Ok(self
            .state
            .read()
            .entities
            .values()
            .filter(|e| e.dirty)
            .map(|e| DirtyEntity {
                entity: e.entity.clone(),
                server_hash: e.server_hash,
            })
            .collect())
    }

    fn pending_deletions(&self) -> SyncResult<Vec<i32>> {
        Ok(self.state.read().deletions.iter().copied().collect())
    }

    fn entity_ids(&self) -> SyncResult<Vec<i32>> {
        Ok(self.state.read().entities.keys().copied().collect())
    }

    fn server_hash(&self, id: i32) -> SyncResult<Option<EntityHash>> {
        Ok(self
            .state
            .read()
            .entities
            .get(&id)
            .and_then(|e| e.server_hash))
    }

    fn is_dirty(&self, id: i32) -> SyncResult<bool> {
        Ok(self.state.read().entities.get(&id).is_some_and(|e| e.dirty))
    }

    fn store_entity(&self, entity: ProjectEntity, server_hash: EntityHash) -> SyncResult<()> {
        let mut state = self.state.write();
        let id = entity.id();
        state.deletions.remove(&id);
        state.entities.insert(
            id,
            LocalEntry {
                entity,
                server_hash: Some(server_hash),
                dirty: false,
            },
        );
        Ok(())
    }

    fn remove_entity(&self, id: i32) -> SyncResult<()> {
        self.state.write().entities.remove(&id);
        Ok(())
    }

    fn mark_clean(&self, id: i32, server_hash: EntityHash) -> SyncResult<()> {
        if let Some(entry) = self.state.write().entities.get_mut(&id) {
            entry.server_hash = Some(server_hash);
            entry.dirty = false;
        }
        Ok(())
    }

    fn clear_deletion(&self, id: i32) -> SyncResult<()> {
        self.state.write().deletions.remove(&id);
        Ok(())
    }

    fn max_id(&self) -> SyncResult<i32> {
        Ok(self
            .state
            .read()
            .entities
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    fn sync_marker(&self) -> SyncResult<Option<SyncWatermark>> {
        Ok(self.state.read().marker)
    }

    fn save_sync_marker(&self, marker: SyncWatermark) -> SyncResult<()> {
        self.state.write().marker = Some(marker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storysync_testkit::{fixed_time, sample_note, sample_scene};

    #[test]
    fn edits_are_dirty_until_marked_clean() {
        let local = MemoryLocalProject::new();
        local.edit(sample_note(1, "draft"));
        assert!(local.is_dirty(1).unwrap());
        assert_eq!(local.dirty_entities().unwrap().len(), 1);
        assert_eq!(local.server_hash(1).unwrap(), None);

        let hash = EntityHash::from_bytes([1; 32]);
        local.mark_clean(1, hash).unwrap();
        assert!(!local.is_dirty(1).unwrap());
        assert_eq!(local.server_hash(1).unwrap(), Some(hash));

        // a later edit keeps the synced hash as its base
        local.edit(sample_note(1, "revised"));
        let dirty = local.dirty_entities().unwrap();
        assert_eq!(dirty[0].server_hash, Some(hash));
    }

    #[test]
    fn deleting_unsynced_entity_needs_no_push() {
        let local = MemoryLocalProject::new();
        local.edit(sample_note(1, "never synced"));
        assert!(local.delete(1));
        assert!(local.pending_deletions().unwrap().is_empty());

        local
            .store_entity(sample_scene(2, "synced"), EntityHash::from_bytes([2; 32]))
            .unwrap();
        assert!(local.delete(2));
        assert_eq!(local.pending_deletions().unwrap(), vec![2]);
        assert!(!local.delete(2));

        local.clear_deletion(2).unwrap();
        assert!(local.pending_deletions().unwrap().is_empty());
    }

    #[test]
    fn ids_and_marker() {
        let local = MemoryLocalProject::new();
        assert_eq!(local.max_id().unwrap(), 0);
        assert_eq!(local.next_id(10), 11);

        local.edit(sample_note(14, "x"));
        local.edit(sample_note(3, "y"));
        assert_eq!(local.max_id().unwrap(), 14);
        assert_eq!(local.next_id(10), 15);
        assert_eq!(local.entity_ids().unwrap(), vec![3, 14]);

        assert_eq!(local.sync_marker().unwrap(), None);
        let marker = SyncWatermark::new(fixed_time(), 14);
        local.save_sync_marker(marker).unwrap();
        assert_eq!(local.sync_marker().unwrap(), Some(marker));
    }
}
