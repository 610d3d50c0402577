//! Sync operations over a project store.
//!
//! [`ProjectRepository`] combines the session registry, the entity lock table
//! and an [`EntityStore`] into the operations the HTTP routes expose. All
//! methods are synchronous and may block on I/O and on entity locks.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::locks::EntityLocks;
use crate::session::{SessionManager, SyncSession};
use crate::store::{EntityStore, StoredEntity};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use storysync_protocol::{
    BeginSyncResponse, EndSyncResponse, EntityHash, ProjectDefinition, ProjectEntity, ProjectKey,
    SyncWatermark, Tombstone, UserId,
};

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The entity was stored; carries its new hash.
    Accepted(EntityHash),
    /// The server holds a different version; carries it. Nothing was written.
    Conflict(ProjectEntity),
}

/// Result of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The server's version differs from the client's.
    Entity {
        /// The server's version.
        entity: ProjectEntity,
        /// Its hash.
        hash: EntityHash,
    },
    /// The client already has the server's version.
    NotModified,
}

/// Server-side sync operations for all projects.
pub struct ProjectRepository {
    store: Arc<dyn EntityStore>,
    sessions: SessionManager,
    locks: EntityLocks,
    create_missing_projects: bool,
    tombstone_retention: Duration,
}

impl ProjectRepository {
    /// Creates a repository over a store.
    pub fn new(store: Arc<dyn EntityStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            sessions: SessionManager::new(config.session_lease),
            locks: EntityLocks::new(),
            create_missing_projects: config.create_missing_projects,
            tombstone_retention: config.tombstone_retention,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Returns the session registry.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Removes expired sessions. Returns how many were removed.
    pub fn reap_expired_sessions(&self) -> usize {
        self.sessions.reap_expired(Utc::now())
    }

    /// Opens a sync session and reports what changed since the project's
    /// last sync.
    ///
    /// # Errors
    ///
    /// See [`begin_sync_since`](Self::begin_sync_since).
    pub fn begin_sync(
        &self,
        user_id: UserId,
        project: &ProjectDefinition,
    ) -> ServerResult<BeginSyncResponse> {
        self.begin_sync_since(user_id, project, None)
    }

    /// Opens a sync session for a client whose own last completed sync was
    /// at `since`.
    ///
    /// Changed and deleted IDs are reported from the earlier of `since` and
    /// the project watermark, so a client that missed other clients' syncs
    /// still learns about their changes.
    ///
    /// # Errors
    ///
    /// - [`ServerError::ProjectNotFound`] if the project is missing and
    ///   projects are not created on demand
    /// - [`ServerError::AlreadySyncing`] if another session is active
    pub fn begin_sync_since(
        &self,
        user_id: UserId,
        project: &ProjectDefinition,
        since: Option<DateTime<Utc>>,
    ) -> ServerResult<BeginSyncResponse> {
        let key = ProjectKey::new(user_id, project.clone());

        if !self.store.project_exists(&key)? {
            if !self.create_missing_projects {
                return Err(ServerError::ProjectNotFound(key.to_string()));
            }
            self.store.create_project(&key)?;
            tracing::info!(project = %key, "created project");
        }

        let now = Utc::now();
        let session = self.sessions.begin(&key, now)?;
        match self.describe(&key, &session, since) {
            Ok(response) => {
                tracing::info!(
                    project = %key,
                    sync_id = %session.sync_id,
                    changed = response.changed_ids.len(),
                    deleted = response.deleted_ids.len(),
                    "sync session started"
                );
                Ok(response)
            }
            Err(e) => {
                self.sessions.close(&key, &session.sync_id);
                Err(e)
            }
        }
    }

    fn describe(
        &self,
        key: &ProjectKey,
        session: &SyncSession,
        since: Option<DateTime<Utc>>,
    ) -> ServerResult<BeginSyncResponse> {
        let watermark = self.store.load_watermark(key)?;
        let last_id = watermark.last_id.max(self.store.max_id(key)?);
        let from = sweep_start(&watermark, since);

        let mut changed_ids: Vec<i32> = self
            .store
            .changed_since(key, from)?
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        changed_ids.sort_unstable();

        let deleted_ids = self
            .store
            .tombstones_since(key, from)?
            .into_iter()
            .map(|t| t.id)
            .collect();

        Ok(BeginSyncResponse {
            sync_id: session.sync_id.clone(),
            last_sync: watermark.last_sync,
            last_id,
            server_time: session.started_at,
            changed_ids,
            deleted_ids,
        })
    }

    /// Closes a sync session, committing the new watermark.
    ///
    /// Tombstones are swept from the previous project watermark.
    ///
    /// # Errors
    ///
    /// See [`end_sync_since`](Self::end_sync_since).
    pub fn end_sync(
        &self,
        user_id: UserId,
        project: &ProjectDefinition,
        sync_id: &str,
        last_sync: Option<DateTime<Utc>>,
        last_id: Option<i32>,
    ) -> ServerResult<EndSyncResponse> {
        self.end_sync_since(user_id, project, sync_id, None, last_sync, last_id)
    }

    /// Closes a sync session for a client whose own last completed sync was
    /// at `since`, committing the new watermark.
    ///
    /// The committed `last_sync` is the client's claim clamped into
    /// `[session start, now]` and never earlier than the previous watermark.
    /// The committed `last_id` is the largest of the previous value, the
    /// claim and the highest stored ID. The response carries every retained
    /// tombstone written after the earlier of `since` and the previous
    /// watermark.
    ///
    /// # Errors
    ///
    /// - [`ServerError::UnknownSession`] if the project has no active session
    /// - [`ServerError::SessionMismatch`] if `sync_id` is not the active one
    pub fn end_sync_since(
        &self,
        user_id: UserId,
        project: &ProjectDefinition,
        sync_id: &str,
        since: Option<DateTime<Utc>>,
        last_sync: Option<DateTime<Utc>>,
        last_id: Option<i32>,
    ) -> ServerResult<EndSyncResponse> {
        let key = ProjectKey::new(user_id, project.clone());
        let now = Utc::now();
        let session = self.sessions.resolve_for_end(&key, sync_id, now)?;

        let prior = self.store.load_watermark(&key)?;
        let committed_sync = last_sync
            .unwrap_or(now)
            .max(session.started_at)
            .min(now)
            .max(prior.last_sync);
        let committed_id = prior
            .last_id
            .max(last_id.unwrap_or(0))
            .max(self.store.max_id(&key)?);

        let tombstones = self
            .store
            .tombstones_since(&key, sweep_start(&prior, since))?;
        self.store
            .save_watermark(&key, &SyncWatermark::new(committed_sync, committed_id))?;

        let purged = self
            .store
            .purge_tombstones(&key, self.retention_cutoff(now))?;
        self.sessions.close(&key, sync_id);

        tracing::info!(
            project = %key,
            sync_id,
            last_sync = %committed_sync,
            last_id = committed_id,
            tombstones = tombstones.len(),
            purged,
            "sync session ended"
        );

        Ok(EndSyncResponse {
            success: true,
            last_sync: committed_sync,
            last_id: committed_id,
            tombstones,
        })
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.tombstone_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Stores an uploaded entity unless that would overwrite an unseen change.
    ///
    /// The upload is accepted when the server has no entity with that ID,
    /// when `original_hash` is the server's current hash, when the upload is
    /// identical to the server's version, or when `force` is set. A forced
    /// upload also replaces an entity of another type stored under the same
    /// ID. Otherwise the server's version is returned as a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::SessionMismatch`] for an invalid session,
    /// [`ServerError::InvalidRequest`] for an entity ID below 1 and
    /// [`ServerError::Storage`] if persistence fails.
    pub fn save_entity(
        &self,
        user_id: UserId,
        project: &ProjectDefinition,
        entity: ProjectEntity,
        original_hash: Option<EntityHash>,
        sync_id: &str,
        force: bool,
    ) -> ServerResult<SaveOutcome> {
        let key = ProjectKey::new(user_id, project.clone());
        self.sessions.validate(&key, sync_id, Utc::now())?;

        let id = entity.id();
        if id < 1 {
            return Err(ServerError::InvalidRequest(format!(
                "entity id {id} is not positive"
            )));
        }
        let _guard = self.locks.lock(&key, id);

        if let Some(current) = self.store.find(&key, id)? {
            let same_type = current.entity_type() == entity.entity_type();
            let unchanged = same_type && current.entity == entity;
            let seen = same_type && original_hash == Some(current.hash);

            if unchanged {
                tracing::debug!(project = %key, id, "upload identical to stored version");
                return Ok(SaveOutcome::Accepted(current.hash));
            }
            if !(force || seen) {
                tracing::debug!(
                    project = %key,
                    id,
                    server_type = %current.entity_type(),
                    "upload conflicts with stored version"
                );
                return Ok(SaveOutcome::Conflict(current.entity));
            }
            if !same_type {
                tracing::warn!(
                    project = %key,
                    id,
                    from = %current.entity_type(),
                    to = %entity.entity_type(),
                    "forced upload replaces entity of another type"
                );
                self.store.delete(&key, current.entity_type(), id)?;
            }
        } else if self.store.clear_tombstone(&key, id)? {
            tracing::debug!(project = %key, id, "re-created deleted entity");
        }

        let stored = StoredEntity::new(entity, Utc::now())?;
        self.store.put(&key, &stored)?;
        tracing::debug!(project = %key, id, hash = %stored.hash, force, "stored entity");
        Ok(SaveOutcome::Accepted(stored.hash))
    }

    /// Returns the server's version of an entity unless the client has it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::EntityNotFound`] if no entity has that ID.
    pub fn download_entity(
        &self,
        user_id: UserId,
        project: &ProjectDefinition,
        id: i32,
        sync_id: &str,
        client_hash: Option<EntityHash>,
    ) -> ServerResult<DownloadOutcome> {
        let key = ProjectKey::new(user_id, project.clone());
        self.sessions.validate(&key, sync_id, Utc::now())?;
        let _guard = self.locks.lock(&key, id);

        let stored = self
            .store
            .find(&key, id)?
            .ok_or(ServerError::EntityNotFound(id))?;

        if client_hash == Some(stored.hash) {
            tracing::debug!(project = %key, id, "download not modified");
            return Ok(DownloadOutcome::NotModified);
        }
        tracing::debug!(project = %key, id, "download");
        Ok(DownloadOutcome::Entity {
            entity: stored.entity,
            hash: stored.hash,
        })
    }

    /// Deletes an entity and records a tombstone.
    ///
    /// Returns false if no entity has that ID.
    pub fn delete_entity(
        &self,
        user_id: UserId,
        project: &ProjectDefinition,
        id: i32,
        sync_id: &str,
    ) -> ServerResult<bool> {
        let key = ProjectKey::new(user_id, project.clone());
        self.sessions.validate(&key, sync_id, Utc::now())?;
        let _guard = self.locks.lock(&key, id);

        let Some(entity_type) = self.store.find_type(&key, id)? else {
            tracing::debug!(project = %key, id, "delete of missing entity");
            return Ok(false);
        };

        self.store.delete(&key, entity_type, id)?;
        self.store
            .add_tombstone(&key, Tombstone::new(id, entity_type, Utc::now()))?;
        tracing::debug!(project = %key, id, %entity_type, "deleted entity");
        Ok(true)
    }
}

/// Start of a change or tombstone sweep for a client last synced at `since`.
fn sweep_start(prior: &SyncWatermark, since: Option<DateTime<Utc>>) -> DateTime<Utc> {
    since.map_or(prior.last_sync, |since| since.min(prior.last_sync))
}
