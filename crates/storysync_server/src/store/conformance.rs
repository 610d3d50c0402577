//! Behaviour every [`EntityStore`] must show, shared by the store tests.

use super::{EntityStore, StoredEntity};
use chrono::{Duration, Utc};
use storysync_protocol::{EntityType, ProjectDefinition, ProjectKey, SyncWatermark, Tombstone};
use storysync_testkit::{fixed_time, project, sample_event, sample_note, sample_scene};

pub(crate) fn key(name: &str) -> ProjectKey {
    ProjectKey::new(1, project(name))
}

pub(crate) fn run_all(store: &dyn EntityStore) {
    project_lifecycle(store);
    put_get_delete(store);
    find_type_across_types(store);
    changed_since_filters_by_time(store);
    watermark_roundtrip(store);
    tombstone_bookkeeping(store);
    projects_are_isolated(store);
}

fn project_lifecycle(store: &dyn EntityStore) {
    let key = key("Lifecycle");
    assert!(!store.project_exists(&key).unwrap());
    store.create_project(&key).unwrap();
    assert!(store.project_exists(&key).unwrap());
    store.create_project(&key).unwrap();
    assert_eq!(store.max_id(&key).unwrap(), 0);
    assert_eq!(store.load_watermark(&key).unwrap(), SyncWatermark::default());
}

fn put_get_delete(store: &dyn EntityStore) {
    let key = key("PutGet");
    store.create_project(&key).unwrap();

    let stored = StoredEntity::new(sample_note(4, "first"), fixed_time()).unwrap();
    store.put(&key, &stored).unwrap();
    assert_eq!(store.get(&key, EntityType::Note, 4).unwrap(), Some(stored.clone()));
    assert_eq!(store.find_type(&key, 4).unwrap(), Some(EntityType::Note));
    assert!(store.get(&key, EntityType::Scene, 4).unwrap().is_none());

    let replaced = StoredEntity::new(sample_note(4, "second"), fixed_time()).unwrap();
    store.put(&key, &replaced).unwrap();
    assert_eq!(store.find(&key, 4).unwrap(), Some(replaced));
    assert_eq!(store.max_id(&key).unwrap(), 4);

    assert!(store.delete(&key, EntityType::Note, 4).unwrap());
    assert!(!store.delete(&key, EntityType::Note, 4).unwrap());
    assert!(store.find(&key, 4).unwrap().is_none());
}

fn find_type_across_types(store: &dyn EntityStore) {
    let key = key("Types");
    store.create_project(&key).unwrap();
    store
        .put(&key, &StoredEntity::new(sample_event(9, "e"), fixed_time()).unwrap())
        .unwrap();
    store
        .put(&key, &StoredEntity::new(sample_scene(2, "s"), fixed_time()).unwrap())
        .unwrap();

    assert_eq!(store.find_type(&key, 9).unwrap(), Some(EntityType::TimelineEvent));
    assert_eq!(store.find_type(&key, 2).unwrap(), Some(EntityType::Scene));
    assert_eq!(store.find_type(&key, 5).unwrap(), None);
    assert_eq!(store.max_id(&key).unwrap(), 9);
}

fn changed_since_filters_by_time(store: &dyn EntityStore) {
    let key = key("Changes");
    store.create_project(&key).unwrap();
    let t0 = fixed_time();
    let t1 = t0 + Duration::seconds(10);

    store
        .put(&key, &StoredEntity::new(sample_note(1, "old"), t0).unwrap())
        .unwrap();
    store
        .put(&key, &StoredEntity::new(sample_scene(2, "new"), t1).unwrap())
        .unwrap();

    let mut all = store.changed_since(&key, t0 - Duration::seconds(1)).unwrap();
    all.sort();
    assert_eq!(all, vec![(EntityType::Scene, 2), (EntityType::Note, 1)]);
    assert_eq!(store.changed_since(&key, t0).unwrap(), vec![(EntityType::Scene, 2)]);
    assert!(store.changed_since(&key, t1).unwrap().is_empty());
}

fn watermark_roundtrip(store: &dyn EntityStore) {
    let key = key("Watermark");
    store.create_project(&key).unwrap();
    let watermark = SyncWatermark::new(fixed_time(), 17);
    store.save_watermark(&key, &watermark).unwrap();
    assert_eq!(store.load_watermark(&key).unwrap(), watermark);
}

fn tombstone_bookkeeping(store: &dyn EntityStore) {
    let key = key("Tombstones");
    store.create_project(&key).unwrap();
    let t0 = fixed_time();

    store
        .add_tombstone(&key, Tombstone::new(3, EntityType::Note, t0))
        .unwrap();
    store
        .add_tombstone(&key, Tombstone::new(1, EntityType::Scene, t0 + Duration::hours(1)))
        .unwrap();

    let all = store.tombstones_since(&key, t0 - Duration::seconds(1)).unwrap();
    assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(store.tombstones_since(&key, t0).unwrap().len(), 1);

    // replacing keeps one tombstone per id
    store
        .add_tombstone(&key, Tombstone::new(3, EntityType::Note, t0 + Duration::hours(2)))
        .unwrap();
    assert_eq!(store.tombstones_since(&key, t0).unwrap().len(), 2);

    assert_eq!(store.purge_tombstones(&key, t0 + Duration::minutes(90)).unwrap(), 1);
    assert!(store.clear_tombstone(&key, 3).unwrap());
    assert!(!store.clear_tombstone(&key, 3).unwrap());
    assert!(store.tombstones_since(&key, t0 - Duration::days(1)).unwrap().is_empty());
}

fn projects_are_isolated(store: &dyn EntityStore) {
    let a = key("Isolated A");
    let b = ProjectKey::new(2, ProjectDefinition::new("Isolated A").unwrap());
    store.create_project(&a).unwrap();
    store.create_project(&b).unwrap();

    store
        .put(&a, &StoredEntity::new(sample_note(1, "a"), Utc::now()).unwrap())
        .unwrap();
    assert!(store.find(&b, 1).unwrap().is_none());
    assert_eq!(store.max_id(&b).unwrap(), 0);
}
