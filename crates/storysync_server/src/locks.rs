//! Per-entity exclusive locks.
//!
//! Every read-check-write on one entity (upload, download, delete) holds the
//! lock for `(user, project, entity id)` for its whole duration. Operations
//! on different entities never wait for each other.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use storysync_protocol::ProjectKey;

type LockKey = (ProjectKey, i32);

/// Table of entity locks.
///
/// Only held keys occupy memory: an entry is inserted on acquire and removed
/// when its guard drops.
#[derive(Debug, Default)]
pub struct EntityLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl EntityLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock for an entity is free, then takes it.
    pub fn lock(&self, project: &ProjectKey, id: i32) -> EntityLockGuard<'_> {
        let key = (project.clone(), id);
        let mut held = self.held.lock();
        while held.contains(&key) {
            self.released.wait(&mut held);
        }
        held.insert(key.clone());
        EntityLockGuard { locks: self, key }
    }

    /// Takes the lock for an entity if it is free.
    #[cfg(test)]
    fn try_lock(&self, project: &ProjectKey, id: i32) -> Option<EntityLockGuard<'_>> {
        let key = (project.clone(), id);
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            return None;
        }
        Some(EntityLockGuard { locks: self, key })
    }

    /// Returns the number of locks currently held.
    #[cfg(test)]
    fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Holds one entity lock; releases it on drop.
#[derive(Debug)]
#[must_use = "the entity is unlocked as soon as the guard is dropped"]
pub struct EntityLockGuard<'a> {
    locks: &'a EntityLocks,
    key: LockKey,
}

impl EntityLockGuard<'_> {
    /// Returns the locked entity ID.
    #[cfg(test)]
    fn entity_id(&self) -> i32 {
        self.key.1
    }
}

impl Drop for EntityLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.key);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use storysync_testkit::project;

    fn key() -> ProjectKey {
        ProjectKey::new(1, project("Locks"))
    }

    #[test]
    fn distinct_entities_do_not_block() {
        let locks = EntityLocks::new();
        let a = locks.lock(&key(), 1);
        let b = locks.try_lock(&key(), 2);
        assert!(b.is_some());
        assert_eq!(locks.held_count(), 2);
        assert_eq!(a.entity_id(), 1);
    }

    #[test]
    fn same_entity_is_exclusive() {
        let locks = EntityLocks::new();
        let guard = locks.lock(&key(), 1);
        assert!(locks.try_lock(&key(), 1).is_none());
        drop(guard);
        assert!(locks.try_lock(&key(), 1).is_some());
    }

    #[test]
    fn entries_removed_on_release() {
        let locks = EntityLocks::new();
        {
            let _a = locks.lock(&key(), 1);
            let _b = locks.lock(&key(), 2);
        }
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn waiters_run_one_at_a_time() {
        let locks = Arc::new(EntityLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    let _guard = locks.lock(&key(), 7);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.held_count(), 0);
    }
}
