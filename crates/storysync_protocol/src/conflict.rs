//! Conflict representation and resolution.

use crate::entity::{EntityType, ProjectEntity};
use crate::error::ProtocolResult;
use crate::hash::EntityHash;

/// Divergent edits of one entity: the client's version and the server's.
///
/// Both versions are kept so a person or a policy can choose between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityConflict {
    /// The client's version.
    pub local: ProjectEntity,
    /// The server's current version.
    pub remote: ProjectEntity,
    /// Resolution (if any).
    pub resolution: Option<ConflictResolution>,
}

impl EntityConflict {
    /// Creates a new unresolved conflict.
    pub fn new(local: ProjectEntity, remote: ProjectEntity) -> Self {
        Self {
            local,
            remote,
            resolution: None,
        }
    }

    /// Returns the entity ID under conflict.
    pub fn entity_id(&self) -> i32 {
        self.local.id()
    }

    /// Returns the type of the local version.
    pub fn entity_type(&self) -> EntityType {
        self.local.entity_type()
    }

    /// Returns true if the server holds a different type under the same ID.
    pub fn is_id_collision(&self) -> bool {
        self.local.entity_type() != self.remote.entity_type()
    }

    /// Returns the server version's hash.
    pub fn remote_hash(&self) -> ProtocolResult<EntityHash> {
        EntityHash::of(&self.remote)
    }

    /// Resolves the conflict with the given resolution.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.resolution = Some(resolution);
    }

    /// Returns true if the conflict has been resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.resolution,
            Some(ConflictResolution::KeepLocal | ConflictResolution::AcceptRemote)
        )
    }
}

/// Resolution for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local version; it is re-uploaded with force.
    KeepLocal,
    /// Accept the server version; it replaces the local copy.
    AcceptRemote,
    /// Leave unresolved for now.
    Skip,
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Server always wins.
    ServerWins,
    /// Client always wins.
    ClientWins,
    /// Manual resolution required.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy automatically resolves conflicts.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Returns the resolution this policy picks.
    pub fn resolution(&self) -> ConflictResolution {
        match self {
            ConflictPolicy::ServerWins => ConflictResolution::AcceptRemote,
            ConflictPolicy::ClientWins => ConflictResolution::KeepLocal,
            ConflictPolicy::Manual => ConflictResolution::Skip,
        }
    }

    /// Resolves a conflict according to this policy.
    pub fn resolve(&self, conflict: &mut EntityConflict) {
        conflict.resolve(self.resolution());
    }
}
