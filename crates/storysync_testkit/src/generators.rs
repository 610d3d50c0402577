//! Property-based test generators using proptest.
//!
//! Provides strategies for generating entities of every type, and pairs of
//! entities that differ in exactly one field.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use storysync_protocol::{
    EncyclopediaEntryEntity, EntityType, EntryImage, NoteEntity, ProjectEntity, SceneDraftEntity,
    SceneEntity, SceneType, TimelineEventEntity,
};

/// Strategy for entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = i32> {
    1..100_000i32
}

/// Strategy for short prose.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 .,'!?-]{0,64}").expect("Invalid regex")
}

/// Strategy for timestamps with second precision.
pub fn time_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    })
}

/// Strategy for entity types.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::sample::select(EntityType::ALL.to_vec())
}

fn scene_strategy() -> impl Strategy<Value = ProjectEntity> {
    (
        entity_id_strategy(),
        any::<bool>(),
        text_strategy(),
        0..50i32,
        prop::collection::vec(0..500i32, 0..4),
        text_strategy(),
        prop::option::of(text_strategy()),
    )
        .prop_map(|(id, group, name, order, path, content, outline)| {
            ProjectEntity::Scene(SceneEntity {
                id,
                scene_type: if group { SceneType::Group } else { SceneType::Scene },
                name,
                order,
                path,
                content,
                outline,
                notes: None,
            })
        })
}

fn note_strategy() -> impl Strategy<Value = ProjectEntity> {
    (entity_id_strategy(), text_strategy(), time_strategy())
        .prop_map(|(id, content, created)| ProjectEntity::Note(NoteEntity { id, content, created }))
}

fn event_strategy() -> impl Strategy<Value = ProjectEntity> {
    (
        entity_id_strategy(),
        0..100i32,
        prop::option::of(text_strategy()),
        text_strategy(),
    )
        .prop_map(|(id, order, date, content)| {
            ProjectEntity::TimelineEvent(TimelineEventEntity {
                id,
                order,
                date,
                content,
            })
        })
}

fn entry_strategy() -> impl Strategy<Value = ProjectEntity> {
    (
        entity_id_strategy(),
        text_strategy(),
        prop::sample::select(vec!["person", "place", "thing", "event"]),
        text_strategy(),
        prop::collection::vec(text_strategy(), 0..4),
        prop::option::of(text_strategy()),
    )
        .prop_map(|(id, name, entry_type, text, tags, image)| {
            ProjectEntity::EncyclopediaEntry(EncyclopediaEntryEntity {
                id,
                name,
                entry_type: entry_type.to_string(),
                text,
                tags,
                image: image.map(|base64| EntryImage {
                    base64,
                    file_extension: "png".to_string(),
                }),
            })
        })
}

fn draft_strategy() -> impl Strategy<Value = ProjectEntity> {
    (
        entity_id_strategy(),
        entity_id_strategy(),
        text_strategy(),
        time_strategy(),
        text_strategy(),
    )
        .prop_map(|(id, scene_id, name, created, content)| {
            ProjectEntity::SceneDraft(SceneDraftEntity {
                id,
                scene_id,
                name,
                created,
                content,
            })
        })
}

/// Strategy for entities of any type.
pub fn entity_strategy() -> impl Strategy<Value = ProjectEntity> {
    prop_oneof![
        scene_strategy(),
        note_strategy(),
        event_strategy(),
        entry_strategy(),
        draft_strategy(),
    ]
}

/// Returns a copy of `entity` whose main text field has `suffix` appended.
pub fn with_edited_text(entity: &ProjectEntity, suffix: &str) -> ProjectEntity {
    let mut edited = entity.clone();
    match &mut edited {
        ProjectEntity::Scene(e) => e.content.push_str(suffix),
        ProjectEntity::Note(e) => e.content.push_str(suffix),
        ProjectEntity::TimelineEvent(e) => e.content.push_str(suffix),
        ProjectEntity::EncyclopediaEntry(e) => e.text.push_str(suffix),
        ProjectEntity::SceneDraft(e) => e.content.push_str(suffix),
    }
    edited
}

/// Returns a copy of `entity` with a different ID.
pub fn with_id(entity: &ProjectEntity, id: i32) -> ProjectEntity {
    let mut moved = entity.clone();
    match &mut moved {
        ProjectEntity::Scene(e) => e.id = id,
        ProjectEntity::Note(e) => e.id = id,
        ProjectEntity::TimelineEvent(e) => e.id = id,
        ProjectEntity::EncyclopediaEntry(e) => e.id = id,
        ProjectEntity::SceneDraft(e) => e.id = id,
    }
    moved
}

/// Strategy for an entity and a variant that differs in one field.
pub fn edited_pair_strategy() -> impl Strategy<Value = (ProjectEntity, ProjectEntity)> {
    (entity_strategy(), "[a-z]{1,8}", any::<bool>()).prop_map(|(entity, suffix, edit_id)| {
        let other = if edit_id {
            with_id(&entity, entity.id().wrapping_add(1))
        } else {
            with_edited_text(&entity, &suffix)
        };
        (entity, other)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn edited_pairs_differ((a, b) in edited_pair_strategy()) {
            prop_assert_ne!(a, b);
        }

        #[test]
        fn with_id_keeps_type(entity in entity_strategy(), id in entity_id_strategy()) {
            let moved = with_id(&entity, id);
            prop_assert_eq!(moved.id(), id);
            prop_assert_eq!(moved.entity_type(), entity.entity_type());
        }
    }
}
