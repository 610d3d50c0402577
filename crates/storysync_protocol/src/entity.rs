//! Synchronizable project entities.
//!
//! Every piece of project content that takes part in sync is one variant of
//! [`ProjectEntity`]. The set is closed: adding a type means adding a variant
//! here and handling it in every exhaustive match (wire decoding, storage,
//! hashing), which the compiler enforces.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discriminator for the five entity types.
///
/// The wire form (see [`EntityType::as_str`]) travels in the entity-type
/// header next to an entity body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// A scene or scene group.
    Scene,
    /// A free-form project note.
    Note,
    /// An event on the project timeline.
    TimelineEvent,
    /// An encyclopedia entry (character, place, thing...).
    EncyclopediaEntry,
    /// A saved draft of a scene.
    SceneDraft,
}

impl EntityType {
    /// All entity types, in discriminator order.
    pub const ALL: [EntityType; 5] = [
        EntityType::Scene,
        EntityType::Note,
        EntityType::TimelineEvent,
        EntityType::EncyclopediaEntry,
        EntityType::SceneDraft,
    ];

    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Scene => "SCENE",
            EntityType::Note => "NOTE",
            EntityType::TimelineEvent => "TIMELINE_EVENT",
            EntityType::EncyclopediaEntry => "ENCYCLOPEDIA_ENTRY",
            EntityType::SceneDraft => "SCENE_DRAFT",
        }
    }

    /// Decodes a JSON entity body of this type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedBody`] if the body is not a valid
    /// payload for this type.
    pub fn decode_body(self, body: &[u8]) -> ProtocolResult<ProjectEntity> {
        let malformed = |e: serde_json::Error| ProtocolError::MalformedBody {
            entity_type: self.as_str(),
            message: e.to_string(),
        };

        let entity = match self {
            EntityType::Scene => ProjectEntity::Scene(serde_json::from_slice(body).map_err(malformed)?),
            EntityType::Note => ProjectEntity::Note(serde_json::from_slice(body).map_err(malformed)?),
            EntityType::TimelineEvent => {
                ProjectEntity::TimelineEvent(serde_json::from_slice(body).map_err(malformed)?)
            }
            EntityType::EncyclopediaEntry => {
                ProjectEntity::EncyclopediaEntry(serde_json::from_slice(body).map_err(malformed)?)
            }
            EntityType::SceneDraft => {
                ProjectEntity::SceneDraft(serde_json::from_slice(body).map_err(malformed)?)
            }
        };
        Ok(entity)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEntityType(s.to_string()))
    }
}

/// Whether a scene holds text or groups other scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SceneType {
    /// A leaf scene with content.
    Scene,
    /// A group of scenes.
    Group,
}

/// A scene or scene group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntity {
    /// Entity ID.
    pub id: i32,
    /// Scene or group.
    pub scene_type: SceneType,
    /// Display name.
    pub name: String,
    /// Position among siblings.
    pub order: i32,
    /// IDs of the ancestor groups, outermost first.
    pub path: Vec<i32>,
    /// Scene text.
    pub content: String,
    /// Optional outline.
    #[serde(default)]
    pub outline: Option<String>,
    /// Optional author notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// A project note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEntity {
    /// Entity ID.
    pub id: i32,
    /// Note text.
    pub content: String,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// An event on the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEventEntity {
    /// Entity ID.
    pub id: i32,
    /// Position on the timeline.
    pub order: i32,
    /// Free-form in-story date.
    #[serde(default)]
    pub date: Option<String>,
    /// Event description.
    pub content: String,
}

/// Image attached to an encyclopedia entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryImage {
    /// Base64 image data.
    pub base64: String,
    /// File extension without the dot.
    pub file_extension: String,
}

/// An encyclopedia entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncyclopediaEntryEntity {
    /// Entity ID.
    pub id: i32,
    /// Entry name.
    pub name: String,
    /// Category of the entry (person, place, ...).
    pub entry_type: String,
    /// Entry body.
    pub text: String,
    /// Tags, in author order.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional image.
    #[serde(default)]
    pub image: Option<EntryImage>,
}

/// A saved scene draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDraftEntity {
    /// Entity ID.
    pub id: i32,
    /// ID of the scene this draft belongs to.
    pub scene_id: i32,
    /// Draft name.
    pub name: String,
    /// When the draft was saved.
    pub created: DateTime<Utc>,
    /// Draft text.
    pub content: String,
}

/// One synchronizable unit of project content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectEntity {
    /// A scene or scene group.
    Scene(SceneEntity),
    /// A project note.
    Note(NoteEntity),
    /// A timeline event.
    TimelineEvent(TimelineEventEntity),
    /// An encyclopedia entry.
    EncyclopediaEntry(EncyclopediaEntryEntity),
    /// A scene draft.
    SceneDraft(SceneDraftEntity),
}

impl ProjectEntity {
    /// Returns the entity ID.
    pub fn id(&self) -> i32 {
        match self {
            ProjectEntity::Scene(e) => e.id,
            ProjectEntity::Note(e) => e.id,
            ProjectEntity::TimelineEvent(e) => e.id,
            ProjectEntity::EncyclopediaEntry(e) => e.id,
            ProjectEntity::SceneDraft(e) => e.id,
        }
    }

    /// Returns the type discriminator.
    pub fn entity_type(&self) -> EntityType {
        match self {
            ProjectEntity::Scene(_) => EntityType::Scene,
            ProjectEntity::Note(_) => EntityType::Note,
            ProjectEntity::TimelineEvent(_) => EntityType::TimelineEvent,
            ProjectEntity::EncyclopediaEntry(_) => EntityType::EncyclopediaEntry,
            ProjectEntity::SceneDraft(_) => EntityType::SceneDraft,
        }
    }

    /// Encodes the untagged JSON body sent on the wire.
    ///
    /// The type is carried separately in the entity-type header.
    pub fn encode_body(&self) -> ProtocolResult<Vec<u8>> {
        let encoded = match self {
            ProjectEntity::Scene(e) => serde_json::to_vec(e),
            ProjectEntity::Note(e) => serde_json::to_vec(e),
            ProjectEntity::TimelineEvent(e) => serde_json::to_vec(e),
            ProjectEntity::EncyclopediaEntry(e) => serde_json::to_vec(e),
            ProjectEntity::SceneDraft(e) => serde_json::to_vec(e),
        };
        encoded.map_err(|e| ProtocolError::encoding(e.to_string()))
    }
}
