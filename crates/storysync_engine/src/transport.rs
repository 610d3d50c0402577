//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use storysync_protocol::{
    BeginSyncResponse, EndSyncResponse, EntityHash, ProjectEntity, ProjectKey,
};

/// Server answer to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    /// Stored; carries the server's hash of the new version.
    Accepted(EntityHash),
    /// The server holds a version the client has not seen.
    Conflict {
        /// The server's version.
        entity: ProjectEntity,
        /// Its hash.
        hash: EntityHash,
    },
}

/// Server answer to a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResult {
    /// The server's version differs from the client's.
    Entity {
        /// The server's version.
        entity: ProjectEntity,
        /// Its hash.
        hash: EntityHash,
    },
    /// The client already has the server's version.
    NotModified,
    /// The server has no entity with that ID.
    NotFound,
}

/// A sync transport handles communication with the sync server.
///
/// Every call names the project it applies to; entity calls also carry the
/// sync ID returned by [`begin_sync`](Self::begin_sync).
pub trait SyncTransport: Send + Sync {
    /// Opens a sync session. `since` is the time of this client's last
    /// completed sync; changes are reported from there.
    fn begin_sync(
        &self,
        project: &ProjectKey,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<BeginSyncResponse>;

    /// Closes a sync session, claiming a new watermark. Tombstones are
    /// reported from `since`, as in [`begin_sync`](Self::begin_sync).
    fn end_sync(
        &self,
        project: &ProjectKey,
        sync_id: &str,
        since: Option<DateTime<Utc>>,
        last_sync: Option<DateTime<Utc>>,
        last_id: Option<i32>,
    ) -> SyncResult<EndSyncResponse>;

    /// Uploads an entity. `original_hash` is the server hash the local copy
    /// was last synced at.
    fn upload(
        &self,
        project: &ProjectKey,
        sync_id: &str,
        entity: &ProjectEntity,
        original_hash: Option<EntityHash>,
        force: bool,
    ) -> SyncResult<UploadResult>;

    /// Downloads an entity unless the server's hash equals `known_hash`.
    fn download(
        &self,
        project: &ProjectKey,
        sync_id: &str,
        id: i32,
        known_hash: Option<EntityHash>,
    ) -> SyncResult<DownloadResult>;

    /// Deletes an entity. Returns false if the server had none.
    fn delete(&self, project: &ProjectKey, sync_id: &str, id: i32) -> SyncResult<bool>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    fn close(&self) -> SyncResult<()>;
}

/// A call recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `begin_sync`.
    Begin {
        /// Client's last sync time.
        since: Option<DateTime<Utc>>,
    },
    /// `end_sync`.
    End {
        /// Client's last sync time.
        since: Option<DateTime<Utc>>,
        /// Claimed last ID.
        last_id: Option<i32>,
    },
    /// `upload` of an entity ID.
    Upload {
        /// Entity ID.
        id: i32,
        /// Force flag.
        force: bool,
    },
    /// `download` of an entity ID.
    Download {
        /// Entity ID.
        id: i32,
    },
    /// `delete` of an entity ID.
    Delete {
        /// Entity ID.
        id: i32,
    },
}

#[derive(Debug, Default)]
struct MockScript {
    begin: VecDeque<SyncResult<BeginSyncResponse>>,
    end: Option<EndSyncResponse>,
    uploads: HashMap<i32, VecDeque<UploadResult>>,
    downloads: HashMap<i32, DownloadResult>,
    calls: Vec<MockCall>,
}

/// A scripted transport for testing.
///
/// Unscripted uploads are accepted with the entity's own hash, unscripted
/// downloads answer [`DownloadResult::NotFound`] and deletes succeed.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    script: Mutex<MockScript>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            script: Mutex::new(MockScript::default()),
        }
    }

    /// Queues the answer to the next `begin_sync`.
    pub fn push_begin(&self, response: SyncResult<BeginSyncResponse>) {
        self.script.lock().begin.push_back(response);
    }

    /// Sets the answer to `end_sync`.
    pub fn set_end(&self, response: EndSyncResponse) {
        self.script.lock().end = Some(response);
    }

    /// Queues the answer to the next upload of `id`.
    pub fn push_upload(&self, id: i32, result: UploadResult) {
        self.script
            .lock()
            .uploads
            .entry(id)
            .or_default()
            .push_back(result);
    }

    /// Sets the answer to downloads of `id`.
    pub fn set_download(&self, id: i32, result: DownloadResult) {
        self.script.lock().downloads.insert(id, result);
    }

    /// Returns the calls made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.script.lock().calls.clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn record(&self, call: MockCall) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.script.lock().calls.push(call);
        Ok(())
    }
}

impl SyncTransport for MockTransport {
    fn begin_sync(
        &self,
        _project: &ProjectKey,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<BeginSyncResponse> {
        self.record(MockCall::Begin { since })?;
        self.script
            .lock()
            .begin
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no scripted begin_sync".into())))
    }

    fn end_sync(
        &self,
        _project: &ProjectKey,
        _sync_id: &str,
        since: Option<DateTime<Utc>>,
        last_sync: Option<DateTime<Utc>>,
        last_id: Option<i32>,
    ) -> SyncResult<EndSyncResponse> {
        self.record(MockCall::End { since, last_id })?;
        let scripted = self.script.lock().end.clone();
        Ok(scripted.unwrap_or_else(|| EndSyncResponse {
            success: true,
            last_sync: last_sync.unwrap_or_else(Utc::now),
            last_id: last_id.unwrap_or(0),
            tombstones: Vec::new(),
        }))
    }

    fn upload(
        &self,
        _project: &ProjectKey,
        _sync_id: &str,
        entity: &ProjectEntity,
        _original_hash: Option<EntityHash>,
        force: bool,
    ) -> SyncResult<UploadResult> {
        let id = entity.id();
        self.record(MockCall::Upload { id, force })?;
        let scripted = self
            .script
            .lock()
            .uploads
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(result) => Ok(result),
            None => Ok(UploadResult::Accepted(EntityHash::of(entity)?)),
        }
    }

    fn download(
        &self,
        _project: &ProjectKey,
        _sync_id: &str,
        id: i32,
        known_hash: Option<EntityHash>,
    ) -> SyncResult<DownloadResult> {
        self.record(MockCall::Download { id })?;
        let scripted = self.script.lock().downloads.get(&id).cloned();
        Ok(match scripted {
            Some(DownloadResult::Entity { hash, .. }) if Some(hash) == known_hash => {
                DownloadResult::NotModified
            }
            Some(result) => result,
            None => DownloadResult::NotFound,
        })
    }

    fn delete(&self, _project: &ProjectKey, _sync_id: &str, id: i32) -> SyncResult<bool> {
        self.record(MockCall::Delete { id })?;
        Ok(true)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.set_connected(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storysync_protocol::ProjectDefinition;

    fn key() -> ProjectKey {
        ProjectKey::new(1, ProjectDefinition::new("Mock").unwrap())
    }

    fn begin_response() -> BeginSyncResponse {
        BeginSyncResponse {
            sync_id: "s".into(),
            last_sync: Utc::now(),
            last_id: 0,
            server_time: Utc::now(),
            changed_ids: Vec::new(),
            deleted_ids: Vec::new(),
        }
    }

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.close().unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.begin_sync(&key(), None),
            Err(SyncError::NotConnected)
        ));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn scripted_begin_is_consumed() {
        let transport = MockTransport::new();
        transport.push_begin(Ok(begin_response()));

        let since = Some(Utc::now());
        assert_eq!(transport.begin_sync(&key(), since).unwrap().sync_id, "s");
        assert!(matches!(
            transport.begin_sync(&key(), None),
            Err(SyncError::Protocol(_))
        ));
        assert_eq!(
            transport.calls(),
            vec![MockCall::Begin { since }, MockCall::Begin { since: None }]
        );
    }

    #[test]
    fn download_honours_known_hash() {
        let transport = MockTransport::new();
        let hash = EntityHash::from_bytes([3; 32]);
        let entity = storysync_protocol::ProjectEntity::TimelineEvent(
            storysync_protocol::TimelineEventEntity {
                id: 4,
                order: 1,
                date: None,
                content: "x".into(),
            },
        );
        transport.set_download(4, DownloadResult::Entity { entity, hash });

        assert_eq!(
            transport.download(&key(), "s", 4, Some(hash)).unwrap(),
            DownloadResult::NotModified
        );
        assert!(matches!(
            transport.download(&key(), "s", 4, None).unwrap(),
            DownloadResult::Entity { .. }
        ));
        assert_eq!(
            transport.download(&key(), "s", 5, None).unwrap(),
            DownloadResult::NotFound
        );
    }
}
