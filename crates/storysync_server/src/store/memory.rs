//! In-memory entity store.

use super::{EntityStore, StoreResult, StoredEntity};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use storysync_protocol::{EntityType, ProjectKey, SyncWatermark, Tombstone};

#[derive(Debug, Default)]
struct ProjectData {
    entities: BTreeMap<(EntityType, i32), StoredEntity>,
    watermark: SyncWatermark,
    tombstones: BTreeMap<i32, Tombstone>,
}

/// An entity store that keeps everything in memory.
///
/// Data is lost when the store is dropped.
///
/// # Example
///
/// ```rust
/// use storysync_server::{EntityStore, MemoryStore};
/// use storysync_protocol::{ProjectDefinition, ProjectKey};
///
/// let store = MemoryStore::new();
/// let key = ProjectKey::new(1, ProjectDefinition::new("Saga").unwrap());
/// store.create_project(&key).unwrap();
/// assert!(store.project_exists(&key).unwrap());
/// assert_eq!(store.max_id(&key).unwrap(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<ProjectKey, ProjectData>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entities stored for a project.
    pub fn entity_count(&self, key: &ProjectKey) -> usize {
        self.projects
            .read()
            .get(key)
            .map_or(0, |data| data.entities.len())
    }

    fn read<R>(&self, key: &ProjectKey, f: impl FnOnce(&ProjectData) -> R) -> Option<R> {
        self.projects.read().get(key).map(f)
    }

    fn write<R>(&self, key: &ProjectKey, f: impl FnOnce(&mut ProjectData) -> R) -> R {
        let mut projects = self.projects.write();
        f(projects.entry(key.clone()).or_default())
    }
}

impl EntityStore for MemoryStore {
    fn project_exists(&self, key: &ProjectKey) -> StoreResult<bool> {
        Ok(self.projects.read().contains_key(key))
    }

    fn create_project(&self, key: &ProjectKey) -> StoreResult<()> {
        self.write(key, |_| ());
        Ok(())
    }

    fn get(
        &self,
        key: &ProjectKey,
        entity_type: EntityType,
        id: i32,
    ) -> StoreResult<Option<StoredEntity>> {
        Ok(self
            .read(key, |data| data.entities.get(&(entity_type, id)).cloned())
            .flatten())
    }

    fn put(&self, key: &ProjectKey, stored: &StoredEntity) -> StoreResult<()> {
        self.write(key, |data| {
            data.entities
                .insert((stored.entity_type(), stored.id()), stored.clone())
        });
        Ok(())
    }

    fn delete(&self, key: &ProjectKey, entity_type: EntityType, id: i32) -> StoreResult<bool> {
        Ok(self.write(key, |data| data.entities.remove(&(entity_type, id)).is_some()))
    }

    fn find_type(&self, key: &ProjectKey, id: i32) -> StoreResult<Option<EntityType>> {
        Ok(self
            .read(key, |data| {
                EntityType::ALL
                    .into_iter()
                    .find(|ty| data.entities.contains_key(&(*ty, id)))
            })
            .flatten())
    }

    fn changed_since(
        &self,
        key: &ProjectKey,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<(EntityType, i32)>> {
        Ok(self
            .read(key, |data| {
                data.entities
                    .iter()
                    .filter(|(_, stored)| stored.updated_at > since)
                    .map(|(k, _)| *k)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn max_id(&self, key: &ProjectKey) -> StoreResult<i32> {
        Ok(self
            .read(key, |data| data.entities.keys().map(|(_, id)| *id).max())
            .flatten()
            .unwrap_or(0))
    }

    fn load_watermark(&self, key: &ProjectKey) -> StoreResult<SyncWatermark> {
        Ok(self.read(key, |data| data.watermark).unwrap_or_default())
    }

    fn save_watermark(&self, key: &ProjectKey, watermark: &SyncWatermark) -> StoreResult<()> {
        self.write(key, |data| data.watermark = *watermark);
        Ok(())
    }

    fn add_tombstone(&self, key: &ProjectKey, tombstone: Tombstone) -> StoreResult<()> {
        self.write(key, |data| data.tombstones.insert(tombstone.id, tombstone));
        Ok(())
    }

    fn tombstones_since(
        &self,
        key: &ProjectKey,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Tombstone>> {
        Ok(self
            .read(key, |data| {
                data.tombstones
                    .values()
                    .filter(|t| t.deleted_at > since)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn clear_tombstone(&self, key: &ProjectKey, id: i32) -> StoreResult<bool> {
        Ok(self.write(key, |data| data.tombstones.remove(&id).is_some()))
    }

    fn purge_tombstones(&self, key: &ProjectKey, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        Ok(self.write(key, |data| {
            let before = data.tombstones.len();
            data.tombstones.retain(|_, t| t.deleted_at >= cutoff);
            before - data.tombstones.len()
        }))
    }
}
