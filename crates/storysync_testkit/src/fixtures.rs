//! Entity fixtures.
//!
//! All timestamps are fixed so fixtures hash identically across runs.

use chrono::{DateTime, TimeZone, Utc};
use storysync_protocol::{
    EncyclopediaEntryEntity, EntityType, NoteEntity, ProjectDefinition, ProjectEntity,
    SceneDraftEntity, SceneEntity, SceneType, TimelineEventEntity,
};

/// A fixed point in time used by every fixture.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 3, 14, 9, 26, 53)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A valid project definition.
///
/// # Panics
///
/// Panics if `name` is not a valid project name.
pub fn project(name: &str) -> ProjectDefinition {
    ProjectDefinition::new(name).expect("fixture project name must be valid")
}

/// A leaf scene.
pub fn sample_scene(id: i32, content: &str) -> ProjectEntity {
    ProjectEntity::Scene(SceneEntity {
        id,
        scene_type: SceneType::Scene,
        name: format!("Scene {id}"),
        order: id,
        path: vec![0],
        content: content.to_string(),
        outline: None,
        notes: None,
    })
}

/// A note.
pub fn sample_note(id: i32, content: &str) -> ProjectEntity {
    ProjectEntity::Note(NoteEntity {
        id,
        content: content.to_string(),
        created: fixed_time(),
    })
}

/// A timeline event.
pub fn sample_event(id: i32, content: &str) -> ProjectEntity {
    ProjectEntity::TimelineEvent(TimelineEventEntity {
        id,
        order: id,
        date: Some("Midwinter".to_string()),
        content: content.to_string(),
    })
}

/// An encyclopedia entry.
pub fn sample_entry(id: i32, text: &str) -> ProjectEntity {
    ProjectEntity::EncyclopediaEntry(EncyclopediaEntryEntity {
        id,
        name: format!("Entry {id}"),
        entry_type: "person".to_string(),
        text: text.to_string(),
        tags: vec!["cast".to_string()],
        image: None,
    })
}

/// A scene draft.
pub fn sample_draft(id: i32, content: &str) -> ProjectEntity {
    ProjectEntity::SceneDraft(SceneDraftEntity {
        id,
        scene_id: 1,
        name: format!("Draft {id}"),
        created: fixed_time(),
        content: content.to_string(),
    })
}

/// An entity of the given type.
pub fn sample_entity(entity_type: EntityType, id: i32, content: &str) -> ProjectEntity {
    match entity_type {
        EntityType::Scene => sample_scene(id, content),
        EntityType::Note => sample_note(id, content),
        EntityType::TimelineEvent => sample_event(id, content),
        EntityType::EncyclopediaEntry => sample_entry(id, content),
        EntityType::SceneDraft => sample_draft(id, content),
    }
}

/// One entity of every type, with consecutive IDs starting at `first_id`.
pub fn one_of_each(first_id: i32) -> Vec<ProjectEntity> {
    EntityType::ALL
        .into_iter()
        .zip(first_id..)
        .map(|(ty, id)| sample_entity(ty, id, "fixture"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_of_each_covers_all_types() {
        let entities = one_of_each(10);
        assert_eq!(entities.len(), EntityType::ALL.len());
        for (entity, (ty, id)) in entities.iter().zip(EntityType::ALL.into_iter().zip(10..)) {
            assert_eq!(entity.entity_type(), ty);
            assert_eq!(entity.id(), id);
        }
    }

    #[test]
    fn fixed_time_is_stable() {
        assert_eq!(fixed_time(), fixed_time());
        assert_eq!(fixed_time().timestamp(), 1_678_786_013);
    }
}
