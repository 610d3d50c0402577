//! Error types for the sync engine.

use storysync_protocol::{EntityType, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server answered with an error status.
    #[error("server error {status} ({kind}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error kind.
        kind: String,
        /// Human-readable message.
        message: String,
    },

    /// The sync session is busy, unknown or was superseded.
    ///
    /// The whole pass has to be restarted.
    #[error("sync session error: {0}")]
    Session(String),

    /// The local project failed.
    #[error("local project error: {0}")]
    Local(String),

    /// A conflict was left unresolved.
    #[error("unresolved conflict for {entity_type} {entity_id}")]
    UnresolvedConflict {
        /// Entity ID.
        entity_id: i32,
        /// Type of the local version.
        entity_type: EntityType,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a local project error.
    pub fn local(message: impl Into<String>) -> Self {
        Self::Local(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(status: u16) -> SyncError {
        SyncError::Server {
            status,
            kind: "internal".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(server(503).is_retryable());
        assert!(!server(400).is_retryable());
        assert!(!SyncError::Session("already syncing".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");

        let err = SyncError::UnresolvedConflict {
            entity_id: 12,
            entity_type: EntityType::Scene,
        };
        assert_eq!(err.to_string(), "unresolved conflict for SCENE 12");
        assert_eq!(
            server(500).to_string(),
            "server error 500 (internal): boom"
        );
    }

    #[test]
    fn protocol_errors_convert() {
        let err: SyncError = ProtocolError::UnknownEntityType("POEM".into()).into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
