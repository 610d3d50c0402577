//! Error types for the sync server.

use crate::store::StoreError;
use axum::http::StatusCode;
use storysync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
///
/// A conflicting upload is not an error; see
/// [`SaveOutcome::Conflict`](crate::SaveOutcome::Conflict).
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication or authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// A sync session is already active for the project.
    #[error("a sync is already in progress for {project}")]
    AlreadySyncing {
        /// The project, as `user/name`.
        project: String,
    },

    /// The project does not exist and may not be created.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// No active session exists for the project.
    #[error("no active sync session")]
    UnknownSession,

    /// The presented sync ID is not the active session's.
    #[error("sync session mismatch")]
    SessionMismatch,

    /// The requested entity does not exist.
    #[error("entity {0} not found")]
    EntityNotFound(i32),

    /// Persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the machine-readable error kind sent in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::NotAuthorized(_) => "not_authorized",
            ServerError::AlreadySyncing { .. } => "already_syncing",
            ServerError::ProjectNotFound(_) => "project_not_found",
            ServerError::UnknownSession => "unknown_session",
            ServerError::SessionMismatch => "session_mismatch",
            ServerError::EntityNotFound(_) => "entity_not_found",
            ServerError::Storage(_) => "storage",
            ServerError::Internal(_) => "internal",
        }
    }

    /// Returns the HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_)
            | ServerError::AlreadySyncing { .. }
            | ServerError::ProjectNotFound(_)
            | ServerError::UnknownSession
            | ServerError::SessionMismatch => StatusCode::BAD_REQUEST,
            ServerError::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::EntityNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Storage(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Returns true if the client must begin a new session.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            ServerError::UnknownSession | ServerError::SessionMismatch
        )
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Encoding(message) => ServerError::Internal(message),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}
