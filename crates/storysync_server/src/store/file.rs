//! File-backed entity store.
//!
//! Layout under the data directory:
//!
//! ```text
//! <root>/
//! ├─ LOCK                        # Advisory lock for single-process access
//! └─ <userId>/<project>/
//!    ├─ watermark.json
//!    ├─ tombstones.json
//!    └─ entities/<TYPE>/<id>.json
//! ```
//!
//! Every document is replaced atomically: written to a temporary file,
//! synced, then renamed over the target.

use super::{EntityStore, StoreError, StoreResult, StoredEntity};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use storysync_protocol::{EntityHash, EntityType, ProjectKey, SyncWatermark, Tombstone};

const LOCK_FILE: &str = "LOCK";
const WATERMARK_FILE: &str = "watermark.json";
const TOMBSTONES_FILE: &str = "tombstones.json";
const ENTITIES_DIR: &str = "entities";

/// An entity store persisting JSON documents on the local file system.
///
/// Holds an exclusive lock on the data directory for its lifetime, so only
/// one store (in any process) can use a directory at a time.
///
/// # Example
///
/// ```no_run
/// use storysync_server::{EntityStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("data")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Serializes read-modify-write of watermark and tombstone documents.
    meta: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another store holds the directory,
    /// or an I/O error if it cannot be created.
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        tracing::debug!(root = %root.display(), "opened file store");
        Ok(Self {
            root: root.to_path_buf(),
            meta: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, key: &ProjectKey) -> PathBuf {
        self.root
            .join(key.user_id.to_string())
            .join(key.project.name())
    }

    fn type_dir(&self, key: &ProjectKey, entity_type: EntityType) -> PathBuf {
        self.project_dir(key)
            .join(ENTITIES_DIR)
            .join(entity_type.as_str())
    }

    fn entity_path(&self, key: &ProjectKey, entity_type: EntityType, id: i32) -> PathBuf {
        self.type_dir(key, entity_type).join(format!("{id}.json"))
    }

    /// Lists the IDs stored for one type.
    fn ids_of(&self, key: &ProjectKey, entity_type: EntityType) -> StoreResult<Vec<i32>> {
        let entries = match fs::read_dir(self.type_dir(key, entity_type)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let id = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<i32>().ok());
            if let Some(id) = id {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn load_tombstones(&self, key: &ProjectKey) -> StoreResult<Vec<Tombstone>> {
        Ok(read_json(&self.project_dir(key).join(TOMBSTONES_FILE))?.unwrap_or_default())
    }

    fn save_tombstones(&self, key: &ProjectKey, tombstones: &[Tombstone]) -> StoreResult<()> {
        write_json(&self.project_dir(key).join(TOMBSTONES_FILE), &tombstones)
    }

    fn update_tombstones<R>(
        &self,
        key: &ProjectKey,
        f: impl FnOnce(&mut Vec<Tombstone>) -> R,
    ) -> StoreResult<R> {
        let _meta = self.meta.lock();
        let mut tombstones = self.load_tombstones(key)?;
        let before = tombstones.clone();
        let result = f(&mut tombstones);
        if tombstones != before {
            self.save_tombstones(key, &tombstones)?;
        }
        Ok(result)
    }
}

impl EntityStore for FileStore {
    fn project_exists(&self, key: &ProjectKey) -> StoreResult<bool> {
        Ok(self.project_dir(key).is_dir())
    }

    fn create_project(&self, key: &ProjectKey) -> StoreResult<()> {
        fs::create_dir_all(self.project_dir(key).join(ENTITIES_DIR))?;
        Ok(())
    }

    fn get(
        &self,
        key: &ProjectKey,
        entity_type: EntityType,
        id: i32,
    ) -> StoreResult<Option<StoredEntity>> {
        let path = self.entity_path(key, entity_type, id);
        let stored: Option<StoredEntity> = read_json(&path).map_err(|e| match e {
            StoreError::Serialization(message) => {
                StoreError::Corrupted(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;
        let Some(stored) = stored else {
            return Ok(None);
        };

        if stored.entity_type() != entity_type || stored.id() != id {
            return Err(StoreError::Corrupted(format!(
                "{} holds {} {}",
                path.display(),
                stored.entity_type(),
                stored.id()
            )));
        }
        if EntityHash::of(&stored.entity)? != stored.hash {
            return Err(StoreError::Corrupted(format!(
                "{}: hash mismatch",
                path.display()
            )));
        }
        Ok(Some(stored))
    }

    fn put(&self, key: &ProjectKey, stored: &StoredEntity) -> StoreResult<()> {
        let path = self.entity_path(key, stored.entity_type(), stored.id());
        write_json(&path, stored)
    }

    fn delete(&self, key: &ProjectKey, entity_type: EntityType, id: i32) -> StoreResult<bool> {
        match fs::remove_file(self.entity_path(key, entity_type, id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn find_type(&self, key: &ProjectKey, id: i32) -> StoreResult<Option<EntityType>> {
        Ok(EntityType::ALL
            .into_iter()
            .find(|ty| self.entity_path(key, *ty, id).is_file()))
    }

    fn changed_since(
        &self,
        key: &ProjectKey,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<(EntityType, i32)>> {
        let mut changed = Vec::new();
        for entity_type in EntityType::ALL {
            for id in self.ids_of(key, entity_type)? {
                // Deleted between listing and reading
                let Some(stored) = self.get(key, entity_type, id)? else {
                    continue;
                };
                if stored.updated_at > since {
                    changed.push((entity_type, id));
                }
            }
        }
        Ok(changed)
    }

    fn max_id(&self, key: &ProjectKey) -> StoreResult<i32> {
        let mut max = 0;
        for entity_type in EntityType::ALL {
            if let Some(id) = self.ids_of(key, entity_type)?.last() {
                max = max.max(*id);
            }
        }
        Ok(max)
    }

    fn load_watermark(&self, key: &ProjectKey) -> StoreResult<SyncWatermark> {
        Ok(read_json(&self.project_dir(key).join(WATERMARK_FILE))?.unwrap_or_default())
    }

    fn save_watermark(&self, key: &ProjectKey, watermark: &SyncWatermark) -> StoreResult<()> {
        let _meta = self.meta.lock();
        write_json(&self.project_dir(key).join(WATERMARK_FILE), watermark)
    }

    fn add_tombstone(&self, key: &ProjectKey, tombstone: Tombstone) -> StoreResult<()> {
        self.update_tombstones(key, |tombstones| {
            tombstones.retain(|t| t.id != tombstone.id);
            tombstones.push(tombstone);
            tombstones.sort_by_key(|t| t.id);
        })
    }

    fn tombstones_since(
        &self,
        key: &ProjectKey,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Tombstone>> {
        let mut tombstones = self.load_tombstones(key)?;
        tombstones.retain(|t| t.deleted_at > since);
        Ok(tombstones)
    }

    fn clear_tombstone(&self, key: &ProjectKey, id: i32) -> StoreResult<bool> {
        self.update_tombstones(key, |tombstones| {
            let before = tombstones.len();
            tombstones.retain(|t| t.id != id);
            tombstones.len() != before
        })
    }

    fn purge_tombstones(&self, key: &ProjectKey, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.update_tombstones(key, |tombstones| {
            let before = tombstones.len();
            tombstones.retain(|t| t.deleted_at >= cutoff);
            before - tombstones.len()
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}
