//! Project identity.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an authenticated user.
pub type UserId = i64;

/// A project, identified by name under its owning user.
///
/// Names double as directory names on the server, so anything that could
/// escape a directory is rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectDefinition {
    name: String,
}

impl ProjectDefinition {
    /// Maximum length of a project name in bytes.
    pub const MAX_NAME_LEN: usize = 255;

    /// Creates a validated project definition.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidProjectName`] if the name is empty,
    /// too long, reserved, or contains a path separator or NUL.
    pub fn new(name: impl Into<String>) -> ProtocolResult<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name.len() > Self::MAX_NAME_LEN {
            Some("name is too long")
        } else if name == "." || name == ".." {
            Some("reserved name")
        } else if name.contains(['/', '\\', '\0']) {
            Some("name contains a path separator")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ProtocolError::InvalidProjectName { name, reason }),
            None => Ok(Self { name }),
        }
    }

    /// Returns the project name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ProjectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for ProjectDefinition {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProjectDefinition> for String {
    fn from(value: ProjectDefinition) -> Self {
        value.name
    }
}

/// A project scoped under its user; the unit of sync state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectKey {
    /// Owning user.
    pub user_id: UserId,
    /// The project.
    pub project: ProjectDefinition,
}

impl ProjectKey {
    /// Creates a project key.
    pub fn new(user_id: UserId, project: ProjectDefinition) -> Self {
        Self { user_id, project }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.project)
    }
}
