//! Inspect command implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use storysync_protocol::{EntityType, ProjectDefinition, ProjectKey, Tombstone, UserId};
use storysync_server::{EntityStore, FileStore};

/// Project inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Project, as `user/name`.
    pub project: String,
    /// Committed watermark time.
    pub last_sync: DateTime<Utc>,
    /// Committed watermark ID.
    pub last_id: i32,
    /// Highest stored entity ID.
    pub max_id: i32,
    /// Live entities per type.
    pub entities: BTreeMap<String, usize>,
    /// Retained tombstones.
    pub tombstones: Vec<Tombstone>,
}

/// Runs the inspect command.
pub fn run(
    data_dir: &Path,
    user: UserId,
    project: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !data_dir.exists() {
        return Err(format!("No data directory at {}", data_dir.display()).into());
    }
    let store = FileStore::open(data_dir)?;
    let key = ProjectKey::new(user, ProjectDefinition::new(project)?);
    let result = inspect(&store, &key)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects a project's bookkeeping from a store.
pub fn inspect(
    store: &dyn EntityStore,
    key: &ProjectKey,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !store.project_exists(key)? {
        return Err(format!("No project {key}").into());
    }

    let watermark = store.load_watermark(key)?;
    let mut entities: BTreeMap<String, usize> = EntityType::ALL
        .into_iter()
        .map(|ty| (ty.as_str().to_owned(), 0))
        .collect();
    for (entity_type, _) in store.changed_since(key, DateTime::<Utc>::MIN_UTC)? {
        *entities.entry(entity_type.as_str().to_owned()).or_default() += 1;
    }

    Ok(InspectResult {
        project: key.to_string(),
        last_sync: watermark.last_sync,
        last_id: watermark.last_id,
        max_id: store.max_id(key)?,
        entities,
        tombstones: store.tombstones_since(key, DateTime::<Utc>::MIN_UTC)?,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("StorySync Project Inspection");
    println!("============================");
    println!();
    println!("Project: {}", result.project);
    println!();
    println!("Watermark:");
    println!("  Last sync: {}", result.last_sync.to_rfc3339());
    println!("  Last ID:   {}", result.last_id);
    println!("  Max ID:    {}", result.max_id);
    println!();
    println!("Entities:");
    for (entity_type, count) in &result.entities {
        println!("  {entity_type:<20} {count}");
    }
    println!();
    println!("Tombstones: {}", result.tombstones.len());
    for tombstone in &result.tombstones {
        println!(
            "  [{}] {} deleted {}",
            tombstone.id,
            tombstone.entity_type,
            tombstone.deleted_at.to_rfc3339()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storysync_server::StoredEntity;
    use storysync_testkit::{fixed_time, project, sample_note, sample_scene};
    use tempfile::TempDir;

    #[test]
    fn reports_counts_and_tombstones() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = ProjectKey::new(3, project("Saga"));
        store.create_project(&key).unwrap();
        for entity in [sample_scene(1, "a"), sample_scene(2, "b"), sample_note(4, "c")] {
            store
                .put(&key, &StoredEntity::new(entity, fixed_time()).unwrap())
                .unwrap();
        }
        store
            .add_tombstone(&key, Tombstone::new(3, EntityType::Note, fixed_time()))
            .unwrap();

        let result = inspect(&store, &key).unwrap();
        assert_eq!(result.max_id, 4);
        assert_eq!(result.entities["SCENE"], 2);
        assert_eq!(result.entities["NOTE"], 1);
        assert_eq!(result.entities["SCENE_DRAFT"], 0);
        assert_eq!(result.tombstones.len(), 1);
    }

    #[test]
    fn missing_project_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = ProjectKey::new(3, project("Nothing"));
        assert!(inspect(&store, &key).is_err());
    }
}
