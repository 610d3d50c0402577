//! Conflict resolution hooks.

use storysync_protocol::{ConflictPolicy, ConflictResolution, EntityConflict};

/// Decides how an upload conflict is settled.
///
/// Returning [`ConflictResolution::Skip`] leaves the conflict unresolved:
/// the local edit stays dirty and the conflict is reported in the cycle
/// result.
pub trait ConflictResolver: Send + Sync {
    /// Picks a resolution for one conflict.
    fn resolve(&self, conflict: &EntityConflict) -> ConflictResolution;
}

impl ConflictResolver for ConflictPolicy {
    fn resolve(&self, _conflict: &EntityConflict) -> ConflictResolution {
        self.resolution()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storysync_testkit::{sample_event, sample_note};

    struct KeepLongest;

    impl ConflictResolver for KeepLongest {
        fn resolve(&self, conflict: &EntityConflict) -> ConflictResolution {
            let len = |e: &storysync_protocol::ProjectEntity| e.encode_body().map_or(0, |b| b.len());
            if len(&conflict.local) >= len(&conflict.remote) {
                ConflictResolution::KeepLocal
            } else {
                ConflictResolution::AcceptRemote
            }
        }
    }

    #[test]
    fn policies_map_to_resolutions() {
        let conflict = EntityConflict::new(sample_note(1, "a"), sample_note(1, "b"));
        assert_eq!(
            ConflictResolver::resolve(&ConflictPolicy::ServerWins, &conflict),
            ConflictResolution::AcceptRemote
        );
        assert_eq!(
            ConflictResolver::resolve(&ConflictPolicy::ClientWins, &conflict),
            ConflictResolution::KeepLocal
        );
        assert_eq!(
            ConflictResolver::resolve(&ConflictPolicy::Manual, &conflict),
            ConflictResolution::Skip
        );
    }

    #[test]
    fn custom_resolvers_see_both_versions() {
        let resolver: &dyn ConflictResolver = &KeepLongest;
        let mine = EntityConflict::new(sample_note(1, "a much longer text"), sample_event(1, "b"));
        assert!(mine.is_id_collision());
        assert_eq!(resolver.resolve(&mine), ConflictResolution::KeepLocal);

        let theirs = EntityConflict::new(sample_note(1, "a"), sample_note(1, "a longer text"));
        assert_eq!(resolver.resolve(&theirs), ConflictResolution::AcceptRemote);
    }
}
