//! Sync session registry.

use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use storysync_protocol::{ProjectDefinition, ProjectKey, UserId};
use uuid::Uuid;

/// An open sync session for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSession {
    /// Opaque session token.
    pub sync_id: String,
    /// Owning user.
    pub user_id: UserId,
    /// The project being synced.
    pub project: ProjectDefinition,
    /// When the session began.
    pub started_at: DateTime<Utc>,
    /// Last time the session was used.
    pub last_activity: DateTime<Utc>,
}

impl SyncSession {
    fn new(key: &ProjectKey, now: DateTime<Utc>) -> Self {
        Self {
            sync_id: Uuid::new_v4().to_string(),
            user_id: key.user_id,
            project: key.project.clone(),
            started_at: now,
            last_activity: now,
        }
    }

    /// Returns the key of the synced project.
    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(self.user_id, self.project.clone())
    }

    /// Returns true if the session has been idle longer than `lease`.
    pub fn is_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_activity) > lease
    }
}

/// Tracks the active session of every project.
///
/// At most one unexpired session exists per project. All checks and state
/// changes happen under one registry lock, so two concurrent `begin` calls
/// for the same project cannot both succeed.
#[derive(Debug)]
pub struct SessionManager {
    lease: Duration,
    sessions: Mutex<HashMap<ProjectKey, SyncSession>>,
}

impl SessionManager {
    /// Creates a registry whose sessions expire after `lease` of inactivity.
    pub fn new(lease: Duration) -> Self {
        Self {
            lease,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the session lease.
    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Opens a session for a project.
    ///
    /// An expired session is superseded.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadySyncing`] if an unexpired session exists.
    pub fn begin(&self, key: &ProjectKey, now: DateTime<Utc>) -> ServerResult<SyncSession> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(key) {
            if !existing.is_expired(now, self.lease) {
                return Err(ServerError::AlreadySyncing {
                    project: key.to_string(),
                });
            }
            tracing::warn!(
                project = %key,
                sync_id = %existing.sync_id,
                "superseding expired sync session"
            );
        }

        let session = SyncSession::new(key, now);
        sessions.insert(key.clone(), session.clone());
        Ok(session)
    }

    /// Checks that `sync_id` is the project's active session and renews it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::SessionMismatch`] if there is no active session,
    /// it has expired, or its ID differs.
    pub fn validate(
        &self,
        key: &ProjectKey,
        sync_id: &str,
        now: DateTime<Utc>,
    ) -> ServerResult<SyncSession> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(key) {
            Some(session) if session.sync_id == sync_id && !session.is_expired(now, self.lease) => {
                session.last_activity = now;
                Ok(session.clone())
            }
            _ => Err(ServerError::SessionMismatch),
        }
    }

    /// Looks up the session an `end_sync` call refers to.
    ///
    /// The session stays registered until [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownSession`] if the project has no active
    /// session, and [`ServerError::SessionMismatch`] if it has another one.
    pub fn resolve_for_end(
        &self,
        key: &ProjectKey,
        sync_id: &str,
        now: DateTime<Utc>,
    ) -> ServerResult<SyncSession> {
        let mut sessions = self.sessions.lock();
        match sessions.get(key) {
            None => Err(ServerError::UnknownSession),
            Some(session) if session.is_expired(now, self.lease) => {
                sessions.remove(key);
                Err(ServerError::UnknownSession)
            }
            Some(session) if session.sync_id != sync_id => Err(ServerError::SessionMismatch),
            Some(session) => Ok(session.clone()),
        }
    }

    /// Removes the session if `sync_id` is still the active one.
    pub fn close(&self, key: &ProjectKey, sync_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(key) {
            Some(session) if session.sync_id == sync_id => {
                sessions.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Returns the project's session, if one is registered.
    pub fn get(&self, key: &ProjectKey) -> Option<SyncSession> {
        self.sessions.lock().get(key).cloned()
    }

    /// Removes every expired session. Returns how many were removed.
    pub fn reap_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|key, session| {
            let expired = session.is_expired(now, self.lease);
            if expired {
                tracing::info!(project = %key, sync_id = %session.sync_id, "sync session expired");
            }
            !expired
        });
        before - sessions.len()
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns true if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
