//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while parsing or encoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The entity type discriminator is not one of the known types.
    #[error("unknown entity type: {0:?}")]
    UnknownEntityType(String),

    /// An entity hash string could not be parsed.
    #[error("invalid entity hash: {0}")]
    InvalidHash(String),

    /// A project name failed validation.
    #[error("invalid project name {name:?}: {reason}")]
    InvalidProjectName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// An entity body could not be decoded.
    #[error("malformed {entity_type} body: {message}")]
    MalformedBody {
        /// Type the body was decoded as.
        entity_type: &'static str,
        /// Decoder message.
        message: String,
    },

    /// Failed to encode a value.
    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl ProtocolError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }
}
