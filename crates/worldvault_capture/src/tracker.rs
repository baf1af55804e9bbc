//! # Entity Tracker
//!
//! Deduplicates mobile-entity observations by stable identity.
//!
//! Last write wins by arrival order: for a single session, arrival
//! order approximates recency, and the in-game timestamp is not
//! trustworthy across server-side teleports. No backpressure bound -
//! entity volume is capped by the simultaneously-visible entity
//! count.

use parking_lot::Mutex;
use std::collections::HashMap;
use worldvault_storage::EntitySnapshot;

/// Keyed snapshot store shared between producer and persistence
/// contexts.
#[derive(Default)]
pub struct EntityTracker {
    snapshots: Mutex<HashMap<u64, EntitySnapshot>>,
}

impl EntityTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a snapshot, superseding any prior snapshot of the same
    /// entity.
    pub fn observe(&self, snapshot: EntitySnapshot) {
        self.snapshots.lock().insert(snapshot.id, snapshot);
    }

    /// Returns all snapshots and clears the tracker.
    #[must_use]
    pub fn drain(&self) -> Vec<EntitySnapshot> {
        self.snapshots.lock().drain().map(|(_, s)| s).collect()
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// True if no entities are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }

    /// Drops all tracked snapshots (discard path).
    pub fn clear(&self) {
        self.snapshots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: u64, x: f64) -> EntitySnapshot {
        EntitySnapshot {
            id,
            kind: "creeper".to_string(),
            position: [x, 64.0, 0.0],
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_later_snapshot_supersedes() {
        let tracker = EntityTracker::new();
        tracker.observe(snapshot(1, 0.0));
        tracker.observe(snapshot(1, 10.0));
        tracker.observe(snapshot(2, 5.0));

        let mut drained = tracker.drain();
        drained.sort_by_key(|s| s.id);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].position[0], 10.0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_drain_clears() {
        let tracker = EntityTracker::new();
        tracker.observe(snapshot(1, 0.0));
        assert_eq!(tracker.len(), 1);
        let _ = tracker.drain();
        assert!(tracker.drain().is_empty());
    }
}
