//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::local::{DirtyEntity, LocalProject};
use crate::resolver::ConflictResolver;
use crate::transport::{DownloadResult, SyncTransport, UploadResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storysync_protocol::{
    BeginSyncResponse, ConflictPolicy, ConflictResolution, EntityConflict, EntityHash,
    ProjectEntity, ProjectKey, SyncWatermark, Tombstone,
};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is opening a server session.
    Beginning,
    /// Engine is pushing local deletions and edits.
    Uploading,
    /// Engine is fetching remote changes.
    Downloading,
    /// Engine is closing the session.
    Ending,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true while a session is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Beginning | SyncState::Uploading | SyncState::Downloading | SyncState::Ending
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Totals over the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed sync cycles.
    pub cycles_completed: u64,
    /// Entities accepted by the server.
    pub entities_uploaded: u64,
    /// Server versions stored locally.
    pub entities_downloaded: u64,
    /// Local deletions pushed to the server.
    pub deletions_pushed: u64,
    /// Local entities removed because the server deleted them.
    pub entities_removed: u64,
    /// Upload conflicts seen.
    pub conflicts_encountered: u64,
    /// Retries after failed cycles.
    pub retries: u64,
    /// When the last cycle completed.
    pub last_sync_time: Option<Instant>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Entities accepted by the server.
    pub uploaded: u64,
    /// Server versions stored locally (downloads and accepted remotes).
    pub downloaded: u64,
    /// Local deletions pushed to the server.
    pub deletions_pushed: u64,
    /// Local entities removed because the server deleted them.
    pub removed: u64,
    /// Conflicts settled during the cycle.
    pub resolved_conflicts: Vec<EntityConflict>,
    /// Conflicts left for the user; their local edits stay dirty.
    pub unresolved_conflicts: Vec<EntityConflict>,
    /// Whether every known entity was checked instead of only changes.
    pub full_refresh: bool,
    /// Watermark committed by the server.
    pub watermark: Option<SyncWatermark>,
    /// True if the cycle completed with no unresolved conflicts.
    pub success: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// Fails with the first unresolved conflict, if any.
    pub fn ensure_resolved(&self) -> SyncResult<()> {
        match self.unresolved_conflicts.first() {
            Some(conflict) => Err(SyncError::UnresolvedConflict {
                entity_id: conflict.entity_id(),
                entity_type: conflict.entity_type(),
            }),
            None => Ok(()),
        }
    }
}

/// The sync engine synchronizes one local project with the server.
pub struct SyncEngine<T: SyncTransport, L: LocalProject> {
    config: SyncConfig,
    key: ProjectKey,
    transport: Arc<T>,
    local: Arc<L>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    resolver: RwLock<Arc<dyn ConflictResolver>>,
    decisions: Mutex<HashMap<i32, ConflictResolution>>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport, L: LocalProject> SyncEngine<T, L> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, transport: T, local: L) -> Self {
        Self::with_shared(config, Arc::new(transport), Arc::new(local))
    }

    /// Creates a sync engine over shared collaborators.
    pub fn with_shared(config: SyncConfig, transport: Arc<T>, local: Arc<L>) -> Self {
        let key = config.key();
        Self {
            config,
            key,
            transport,
            local,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            resolver: RwLock::new(Arc::new(ConflictPolicy::ServerWins)),
            decisions: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local project.
    pub fn local(&self) -> &Arc<L> {
        &self.local
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Resolves conflicts by a fixed policy. The default is
    /// [`ConflictPolicy::ServerWins`].
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        *self.resolver.write() = Arc::new(policy);
    }

    /// Resolves conflicts with a custom resolver.
    pub fn set_conflict_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        *self.resolver.write() = resolver;
    }

    /// Records the user's decision for the next conflict on an entity.
    ///
    /// Takes precedence over the resolver, once.
    pub fn decide(&self, entity_id: i32, resolution: ConflictResolution) {
        self.decisions.lock().insert(entity_id, resolution);
    }

    /// Cancels any ongoing sync operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Performs one sync cycle: begin, upload, download, end.
    ///
    /// Unresolved conflicts do not fail the cycle; they are reported in the
    /// result (see [`SyncCycleResult::ensure_resolved`]).
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.reset_cancel();

        if !self.state().can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "Beginning".into(),
            });
        }

        self.set_state(SyncState::Beginning);
        let begun = self.local.sync_marker().and_then(|marker| {
            let since = marker.map(|m| m.last_sync);
            let begin = self.transport.begin_sync(&self.key, since)?;
            Ok((begin, since))
        });
        let (begin, since) = match begun {
            Ok(begun) => begun,
            Err(e) => {
                self.handle_error(&e);
                return Err(e);
            }
        };
        tracing::info!(
            project = %self.key,
            sync_id = %begin.sync_id,
            last_id = begin.last_id,
            changed = begin.changed_ids.len(),
            deleted = begin.deleted_ids.len(),
            "sync session started"
        );

        let mut result = SyncCycleResult::default();
        if let Err(e) = self.run_session(&begin, since, &mut result) {
            self.abandon(&begin.sync_id, since);
            self.handle_error(&e);
            return Err(e);
        }

        result.success = result.unresolved_conflicts.is_empty();
        result.duration = start.elapsed();
        self.set_state(SyncState::Synced);

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.entities_uploaded += result.uploaded;
            stats.entities_downloaded += result.downloaded;
            stats.deletions_pushed += result.deletions_pushed;
            stats.entities_removed += result.removed;
            stats.conflicts_encountered +=
                (result.resolved_conflicts.len() + result.unresolved_conflicts.len()) as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }

        tracing::info!(
            project = %self.key,
            uploaded = result.uploaded,
            downloaded = result.downloaded,
            removed = result.removed,
            unresolved = result.unresolved_conflicts.len(),
            full_refresh = result.full_refresh,
            "sync cycle completed"
        );
        Ok(result)
    }

    /// Performs a sync with retry on transient errors.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
                self.set_state(SyncState::Error);
            }
            self.check_cancelled()?;

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    tracing::warn!(project = %self.key, attempt, error = %e, "sync failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run_session(
        &self,
        begin: &BeginSyncResponse,
        since: Option<DateTime<Utc>>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let sync_id = begin.sync_id.as_str();
        // IDs settled while uploading are not downloaded again
        let mut settled = BTreeSet::new();

        self.check_cancelled()?;
        self.set_state(SyncState::Uploading);
        self.push_deletions(sync_id, &mut settled, result)?;
        self.upload_dirty(sync_id, &mut settled, result)?;

        self.check_cancelled()?;
        self.set_state(SyncState::Downloading);
        self.download_changes(begin, &settled, result)?;

        self.check_cancelled()?;
        self.set_state(SyncState::Ending);
        let claimed_id = self.local.max_id()?.max(begin.last_id);
        let end = self
            .transport
            .end_sync(&self.key, sync_id, since, None, Some(claimed_id))?;
        self.apply_tombstones(&end.tombstones, result)?;

        let marker = SyncWatermark::new(end.last_sync, end.last_id);
        self.local.save_sync_marker(marker)?;
        result.watermark = Some(marker);
        Ok(())
    }

    fn push_deletions(
        &self,
        sync_id: &str,
        settled: &mut BTreeSet<i32>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        for id in self.local.pending_deletions()? {
            self.check_cancelled()?;
            let existed = self.transport.delete(&self.key, sync_id, id)?;
            self.local.clear_deletion(id)?;
            settled.insert(id);
            if existed {
                result.deletions_pushed += 1;
            }
            tracing::debug!(id, existed, "pushed deletion");
        }
        Ok(())
    }

    fn upload_dirty(
        &self,
        sync_id: &str,
        settled: &mut BTreeSet<i32>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        for DirtyEntity {
            entity,
            server_hash,
        } in self.local.dirty_entities()?
        {
            self.check_cancelled()?;
            let id = entity.id();
            settled.insert(id);

            match self
                .transport
                .upload(&self.key, sync_id, &entity, server_hash, false)?
            {
                UploadResult::Accepted(hash) => {
                    self.local.mark_clean(id, hash)?;
                    result.uploaded += 1;
                    tracing::debug!(id, %hash, "uploaded");
                }
                UploadResult::Conflict {
                    entity: remote,
                    hash,
                } => self.settle_conflict(sync_id, entity, remote, hash, result)?,
            }
        }
        Ok(())
    }

    fn settle_conflict(
        &self,
        sync_id: &str,
        local: ProjectEntity,
        remote: ProjectEntity,
        remote_hash: EntityHash,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let mut conflict = EntityConflict::new(local, remote);
        let id = conflict.entity_id();

        let decided = self.decisions.lock().remove(&id);
        let resolution = match decided {
            Some(resolution) => resolution,
            None => self.resolver.read().resolve(&conflict),
        };
        conflict.resolve(resolution);
        tracing::info!(
            id,
            ?resolution,
            id_collision = conflict.is_id_collision(),
            "upload conflict"
        );

        match resolution {
            ConflictResolution::KeepLocal => {
                match self.transport.upload(
                    &self.key,
                    sync_id,
                    &conflict.local,
                    Some(remote_hash),
                    true,
                )? {
                    UploadResult::Accepted(hash) => {
                        self.local.mark_clean(id, hash)?;
                        result.uploaded += 1;
                    }
                    UploadResult::Conflict { .. } => {
                        return Err(SyncError::Protocol(format!(
                            "server refused forced upload of entity {id}"
                        )));
                    }
                }
            }
            ConflictResolution::AcceptRemote => {
                self.local.store_entity(conflict.remote.clone(), remote_hash)?;
                result.downloaded += 1;
            }
            ConflictResolution::Skip => {
                result.unresolved_conflicts.push(conflict);
                return Ok(());
            }
        }
        result.resolved_conflicts.push(conflict);
        Ok(())
    }

    /// Picks the IDs to check against the server.
    ///
    /// If this client committed the server's current watermark, only the
    /// entities changed since then and IDs above its last known ID can
    /// differ. Otherwise every reported and known ID is checked; unchanged
    /// entities answer not-modified.
    fn download_candidates(&self, begin: &BeginSyncResponse) -> SyncResult<(BTreeSet<i32>, bool)> {
        let mut candidates = BTreeSet::new();
        match self.local.sync_marker()? {
            Some(marker) if marker.last_sync >= begin.last_sync => {
                candidates.extend(begin.changed_ids.iter().copied());
                candidates.extend(begin.deleted_ids.iter().copied());
                candidates.extend(marker.last_id.saturating_add(1)..=begin.last_id);
                Ok((candidates, false))
            }
            _ => {
                candidates.extend(begin.changed_ids.iter().copied());
                candidates.extend(begin.deleted_ids.iter().copied());
                candidates.extend(1..=begin.last_id);
                candidates.extend(self.local.entity_ids()?);
                Ok((candidates, true))
            }
        }
    }

    fn download_changes(
        &self,
        begin: &BeginSyncResponse,
        settled: &BTreeSet<i32>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let (candidates, full_refresh) = self.download_candidates(begin)?;
        result.full_refresh = full_refresh;

        for &id in candidates.difference(settled) {
            self.check_cancelled()?;
            if self.local.is_dirty(id)? {
                continue;
            }

            let known = self.local.server_hash(id)?;
            match self
                .transport
                .download(&self.key, &begin.sync_id, id, known)?
            {
                DownloadResult::Entity { entity, hash } => {
                    self.local.store_entity(entity, hash)?;
                    result.downloaded += 1;
                    tracing::debug!(id, %hash, "downloaded");
                }
                DownloadResult::NotModified => {}
                DownloadResult::NotFound => {
                    if known.is_some() {
                        self.local.remove_entity(id)?;
                        result.removed += 1;
                        tracing::debug!(id, "removed entity missing on server");
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_tombstones(
        &self,
        tombstones: &[Tombstone],
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        for tombstone in tombstones {
            let id = tombstone.id;
            if self.local.is_dirty(id)? {
                tracing::debug!(id, "keeping local edit of entity deleted on server");
                continue;
            }
            if self.local.server_hash(id)?.is_some() {
                self.local.remove_entity(id)?;
                result.removed += 1;
                tracing::debug!(id, entity_type = %tombstone.entity_type, "applied tombstone");
            }
        }
        Ok(())
    }

    /// Closes a failed cycle's session so the next attempt is not refused.
    fn abandon(&self, sync_id: &str, since: Option<DateTime<Utc>>) {
        if let Err(e) = self
            .transport
            .end_sync(&self.key, sync_id, since, None, None)
        {
            tracing::warn!(project = %self.key, sync_id, error = %e, "could not close sync session");
        }
    }

    fn handle_error(&self, error: &SyncError) {
        tracing::warn!(project = %self.key, error = %error, "sync failed");
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::local::MemoryLocalProject;
    use crate::transport::{MockCall, MockTransport};
    use storysync_protocol::{EndSyncResponse, EntityType, ProjectDefinition};
    use storysync_testkit::{fixed_time, sample_note, sample_scene};

    type Engine = SyncEngine<MockTransport, MemoryLocalProject>;

    fn engine() -> Engine {
        let config = SyncConfig::new(1, ProjectDefinition::new("Novel").unwrap(), "mock://")
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::ZERO)
                    .with_jitter(0.0),
            );
        SyncEngine::new(config, MockTransport::new(), MemoryLocalProject::new())
    }

    fn begin(last_sync: DateTime<Utc>, last_id: i32, changed: Vec<i32>) -> BeginSyncResponse {
        BeginSyncResponse {
            sync_id: "sid".into(),
            last_sync,
            last_id,
            server_time: Utc::now(),
            changed_ids: changed,
            deleted_ids: Vec::new(),
        }
    }

    fn hash(entity: &ProjectEntity) -> EntityHash {
        EntityHash::of(entity).unwrap()
    }

    fn uploads(engine: &Engine) -> Vec<(i32, bool)> {
        engine
            .transport()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Upload { id, force } => Some((id, force)),
                _ => None,
            })
            .collect()
    }

    fn downloads(engine: &Engine) -> Vec<i32> {
        engine
            .transport()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Download { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn state_predicates() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Uploading.can_start_sync());
        assert!(SyncState::Ending.is_active());
        assert!(!SyncState::RetryWait.is_active());
    }

    #[test]
    fn uploads_dirty_entities_and_commits_marker() {
        let engine = engine();
        let note = sample_note(1, "new");
        engine.local().edit(note.clone());
        engine
            .transport()
            .push_begin(Ok(begin(DateTime::<Utc>::UNIX_EPOCH, 0, vec![])));

        let result = engine.sync().unwrap();
        assert!(result.success);
        assert_eq!(result.uploaded, 1);
        assert!(result.full_refresh);
        assert_eq!(engine.state(), SyncState::Synced);

        let local = engine.local();
        assert!(!local.is_dirty(1).unwrap());
        assert_eq!(local.server_hash(1).unwrap(), Some(hash(&note)));
        assert_eq!(local.sync_marker().unwrap(), result.watermark);
        assert_eq!(
            engine.transport().calls(),
            vec![
                MockCall::Begin { since: None },
                MockCall::Upload { id: 1, force: false },
                MockCall::End {
                    since: None,
                    last_id: Some(1)
                },
            ]
        );

        let stats = engine.stats();
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.entities_uploaded, 1);
        assert!(stats.last_sync_time.is_some());
    }

    #[test]
    fn server_wins_by_default() {
        let engine = engine();
        let mine = sample_note(2, "mine");
        let theirs = sample_note(2, "theirs");
        engine.local().edit(mine);
        engine.transport().push_begin(Ok(begin(fixed_time(), 2, vec![2])));
        engine.transport().push_upload(
            2,
            UploadResult::Conflict {
                entity: theirs.clone(),
                hash: hash(&theirs),
            },
        );

        let result = engine.sync().unwrap();
        assert_eq!(result.resolved_conflicts.len(), 1);
        assert_eq!(
            result.resolved_conflicts[0].resolution,
            Some(ConflictResolution::AcceptRemote)
        );
        assert_eq!(engine.local().get(2), Some(theirs));
        assert!(!engine.local().is_dirty(2).unwrap());
        // settled while uploading, so not downloaded again
        assert!(!downloads(&engine).contains(&2));
    }

    #[test]
    fn client_wins_forces_upload() {
        let engine = engine();
        engine.set_conflict_policy(ConflictPolicy::ClientWins);
        let mine = sample_note(2, "mine");
        let theirs = sample_note(2, "theirs");
        engine.local().edit(mine.clone());
        engine.transport().push_begin(Ok(begin(fixed_time(), 2, vec![])));
        engine.transport().push_upload(
            2,
            UploadResult::Conflict {
                entity: theirs.clone(),
                hash: hash(&theirs),
            },
        );

        let result = engine.sync().unwrap();
        assert!(result.success);
        assert_eq!(uploads(&engine), vec![(2, false), (2, true)]);
        assert_eq!(engine.local().get(2), Some(mine.clone()));
        assert_eq!(engine.local().server_hash(2).unwrap(), Some(hash(&mine)));
    }

    #[test]
    fn manual_policy_reports_conflicts() {
        let engine = engine();
        engine.set_conflict_policy(ConflictPolicy::Manual);
        let theirs = sample_scene(4, "theirs");
        engine.local().edit(sample_note(4, "mine"));
        engine.transport().push_begin(Ok(begin(fixed_time(), 4, vec![])));
        engine.transport().push_upload(
            4,
            UploadResult::Conflict {
                entity: theirs.clone(),
                hash: hash(&theirs),
            },
        );

        let result = engine.sync().unwrap();
        assert!(!result.success);
        assert_eq!(result.unresolved_conflicts.len(), 1);
        assert!(result.unresolved_conflicts[0].is_id_collision());
        assert!(matches!(
            result.ensure_resolved(),
            Err(SyncError::UnresolvedConflict {
                entity_id: 4,
                entity_type: EntityType::Note
            })
        ));
        assert!(engine.local().is_dirty(4).unwrap());
        assert_eq!(engine.stats().conflicts_encountered, 1);
    }

    #[test]
    fn recorded_decision_overrides_policy_once() {
        let engine = engine();
        engine.set_conflict_policy(ConflictPolicy::Manual);
        engine.decide(4, ConflictResolution::KeepLocal);
        let theirs = sample_note(4, "theirs");
        engine.local().edit(sample_note(4, "mine"));
        engine.transport().push_begin(Ok(begin(fixed_time(), 4, vec![])));
        engine.transport().push_upload(
            4,
            UploadResult::Conflict {
                entity: theirs.clone(),
                hash: hash(&theirs),
            },
        );

        let result = engine.sync().unwrap();
        assert!(result.success);
        assert_eq!(uploads(&engine), vec![(4, false), (4, true)]);
        assert!(engine.decisions.lock().is_empty());
    }

    #[test]
    fn first_sync_checks_every_id() {
        let engine = engine();
        let remote = sample_scene(2, "remote");
        engine.transport().set_download(
            2,
            DownloadResult::Entity {
                entity: remote.clone(),
                hash: hash(&remote),
            },
        );
        engine.transport().push_begin(Ok(begin(fixed_time(), 3, vec![])));

        let result = engine.sync().unwrap();
        assert!(result.full_refresh);
        assert_eq!(downloads(&engine), vec![1, 2, 3]);
        assert_eq!(result.downloaded, 1);
        assert_eq!(engine.local().get(2), Some(remote));
    }

    #[test]
    fn caught_up_client_only_checks_changes() {
        let engine = engine();
        engine
            .local()
            .save_sync_marker(SyncWatermark::new(fixed_time(), 5))
            .unwrap();
        engine
            .transport()
            .push_begin(Ok(begin(fixed_time(), 7, vec![2, 4])));

        let result = engine.sync().unwrap();
        assert!(!result.full_refresh);
        assert_eq!(downloads(&engine), vec![2, 4, 6, 7]);
    }

    #[test]
    fn full_refresh_checks_reported_ids() {
        let engine = engine();
        let mut response = begin(fixed_time(), 2, vec![0]);
        response.deleted_ids = vec![-3];
        engine.transport().push_begin(Ok(response));

        let result = engine.sync().unwrap();
        assert!(result.full_refresh);
        assert_eq!(downloads(&engine), vec![-3, 0, 1, 2]);
    }

    #[test]
    fn saved_marker_is_sent_as_since() {
        let engine = engine();
        let marker_time = fixed_time() - chrono::Duration::hours(1);
        engine
            .local()
            .save_sync_marker(SyncWatermark::new(marker_time, 0))
            .unwrap();
        engine.transport().push_begin(Ok(begin(fixed_time(), 0, vec![])));

        engine.sync().unwrap();
        let calls = engine.transport().calls();
        assert_eq!(
            calls.first(),
            Some(&MockCall::Begin {
                since: Some(marker_time)
            })
        );
        assert_eq!(
            calls.last(),
            Some(&MockCall::End {
                since: Some(marker_time),
                last_id: Some(0)
            })
        );
    }

    #[test]
    fn missing_on_server_removes_clean_copy() {
        let engine = engine();
        let gone = sample_note(3, "gone");
        engine.local().store_entity(gone.clone(), hash(&gone)).unwrap();
        engine.local().edit(sample_note(5, "unsynced"));
        engine.transport().push_begin(Ok(begin(fixed_time(), 5, vec![])));

        let result = engine.sync().unwrap();
        assert_eq!(result.removed, 1);
        assert_eq!(engine.local().get(3), None);
        assert!(engine.local().get(5).is_some());
    }

    #[test]
    fn tombstones_remove_clean_entities_only() {
        let engine = engine();
        let clean = sample_note(1, "clean");
        let edited = sample_note(2, "edited");
        engine.local().store_entity(clean.clone(), hash(&clean)).unwrap();
        engine.local().store_entity(edited.clone(), hash(&edited)).unwrap();
        engine
            .local()
            .save_sync_marker(SyncWatermark::new(fixed_time(), 2))
            .unwrap();
        engine.set_conflict_policy(ConflictPolicy::Manual);
        engine.local().edit(sample_note(2, "edited again"));
        engine.transport().push_upload(
            2,
            UploadResult::Conflict {
                entity: edited.clone(),
                hash: hash(&edited),
            },
        );
        engine.transport().push_begin(Ok(begin(fixed_time(), 2, vec![])));
        engine.transport().set_end(EndSyncResponse {
            success: true,
            last_sync: Utc::now(),
            last_id: 2,
            tombstones: vec![
                Tombstone::new(1, EntityType::Note, Utc::now()),
                Tombstone::new(2, EntityType::Note, Utc::now()),
            ],
        });

        let result = engine.sync().unwrap();
        assert_eq!(result.removed, 1);
        assert_eq!(engine.local().get(1), None);
        assert!(engine.local().get(2).is_some());
    }

    #[test]
    fn deletions_are_pushed_first() {
        let engine = engine();
        let doomed = sample_note(8, "doomed");
        engine.local().store_entity(doomed.clone(), hash(&doomed)).unwrap();
        engine.local().delete(8);
        engine.transport().push_begin(Ok(begin(fixed_time(), 8, vec![])));

        let result = engine.sync().unwrap();
        assert_eq!(result.deletions_pushed, 1);
        assert!(engine.local().pending_deletions().unwrap().is_empty());
        assert_eq!(engine.transport().calls()[1], MockCall::Delete { id: 8 });
        assert!(!downloads(&engine).contains(&8));
    }

    #[test]
    fn failure_after_begin_closes_session() {
        let engine = engine();
        engine.set_conflict_policy(ConflictPolicy::ClientWins);
        let theirs = sample_note(1, "theirs");
        let conflict = UploadResult::Conflict {
            entity: theirs.clone(),
            hash: hash(&theirs),
        };
        engine.local().edit(sample_note(1, "mine"));
        engine.transport().push_begin(Ok(begin(fixed_time(), 1, vec![])));
        engine.transport().push_upload(1, conflict.clone());
        engine.transport().push_upload(1, conflict);

        assert!(matches!(engine.sync(), Err(SyncError::Protocol(_))));
        assert_eq!(engine.state(), SyncState::Error);
        assert_eq!(
            engine.transport().calls(),
            vec![
                MockCall::Begin { since: None },
                MockCall::Upload { id: 1, force: false },
                MockCall::Upload { id: 1, force: true },
                MockCall::End {
                    since: None,
                    last_id: None
                },
            ]
        );
        assert!(engine.local().is_dirty(1).unwrap());
        assert_eq!(engine.local().sync_marker().unwrap(), None);
    }

    #[test]
    fn cancelled_engine_does_not_retry() {
        let engine = engine();
        engine.cancel();
        engine
            .transport()
            .push_begin(Ok(begin(DateTime::<Utc>::UNIX_EPOCH, 0, vec![])));

        assert!(matches!(engine.sync_with_retry(), Err(SyncError::Cancelled)));
        assert!(engine.transport().calls().is_empty());
    }

    #[test]
    fn begin_failure_sets_error_state() {
        let engine = engine();
        engine
            .transport()
            .push_begin(Err(SyncError::Session("already syncing".into())));

        let err = engine.sync().unwrap_err();
        assert!(matches!(err, SyncError::Session(_)));
        assert_eq!(engine.state(), SyncState::Error);
        assert_eq!(
            engine.transport().calls(),
            vec![MockCall::Begin { since: None }]
        );
        assert!(engine.stats().last_error.is_some());
    }

    #[test]
    fn retries_transient_failures() {
        let engine = engine();
        engine
            .transport()
            .push_begin(Err(SyncError::transport_retryable("reset")));
        engine
            .transport()
            .push_begin(Ok(begin(DateTime::<Utc>::UNIX_EPOCH, 0, vec![])));

        let result = engine.sync_with_retry().unwrap();
        assert!(result.success);
        assert_eq!(engine.stats().retries, 1);
    }

    #[test]
    fn does_not_retry_permanent_failures() {
        let engine = engine();
        engine
            .transport()
            .push_begin(Err(SyncError::AuthenticationFailed("bad token".into())));
        engine
            .transport()
            .push_begin(Ok(begin(DateTime::<Utc>::UNIX_EPOCH, 0, vec![])));

        assert!(matches!(
            engine.sync_with_retry(),
            Err(SyncError::AuthenticationFailed(_))
        ));
        assert_eq!(engine.stats().retries, 0);
    }
}
