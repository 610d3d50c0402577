//! # StorySync Protocol
//!
//! Entity model, content hashing and wire messages for StorySync.
//!
//! This crate provides:
//! - [`ProjectEntity`], a closed sum over the five synchronizable entity types
//! - [`EntityHash`], a deterministic SHA-256 digest of an entity's canonical form
//! - [`ProjectDefinition`] and [`ProjectKey`] for scoping projects under a user
//! - Session and bookkeeping messages exchanged over HTTP
//! - [`EntityConflict`] and conflict resolution policies
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Hashing
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use storysync_protocol::{EntityHash, NoteEntity, ProjectEntity};
//!
//! let note = ProjectEntity::Note(NoteEntity {
//!     id: 7,
//!     content: "Remember the lighthouse".into(),
//!     created: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
//! });
//!
//! let hash = EntityHash::of(&note).unwrap();
//! assert_eq!(hash, EntityHash::of(&note.clone()).unwrap());
//! assert_eq!(hash.to_string().len(), 64);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bookkeeping;
mod conflict;
mod entity;
mod error;
mod hash;
mod messages;
mod project;

pub use bookkeeping::{SyncWatermark, Tombstone};
pub use conflict::{ConflictPolicy, ConflictResolution, EntityConflict};
pub use entity::{
    EncyclopediaEntryEntity, EntityType, EntryImage, NoteEntity, ProjectEntity, SceneDraftEntity,
    SceneEntity, SceneType, TimelineEventEntity,
};
pub use error::{ProtocolError, ProtocolResult};
pub use hash::EntityHash;
pub use messages::{
    BeginSyncResponse, DeleteEntityResponse, EndSyncResponse, ErrorResponse, SaveEntityResponse,
    FORM_LAST_ID, FORM_LAST_SYNC, FORM_SINCE, HEADER_ENTITY_HASH, HEADER_ENTITY_TYPE,
    HEADER_ORIGINAL_HASH, HEADER_SYNC_ID, QUERY_FORCE,
};
pub use project::{ProjectDefinition, ProjectKey, UserId};
