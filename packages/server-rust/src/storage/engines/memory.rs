//! In-memory [`StorageEngine`] implementation backed by [`DashMap`].
//!
//! Suitable for tests and for ephemeral deployments. Commits are serialized
//! through a short synchronous gate so validation and application are atomic
//! with respect to each other and to loads; the gate is never held across an
//! `.await`. Deleted keys stay behind as tombstones so their versions keep
//! increasing if they are written again.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::storage::engine::{first_conflict, StorageEngine};
use crate::storage::error::PersistenceError;
use crate::storage::record::{CommitBatch, StoredRecord, Versioned};

/// In-memory versioned key store.
pub struct MemoryEngine {
    entries: DashMap<String, StoredRecord>,
    commit_gate: RwLock<()>,
}

impl MemoryEngine {
    /// Creates a new, empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            commit_gate: RwLock::new(()),
        }
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_live()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every live record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Versioned)> {
        let _gate = self.commit_gate.read();
        self.entries
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .clone()
                    .into_live()
                    .map(|record| (entry.key().clone(), record))
            })
            .collect()
    }

    fn current_version(&self, key: &str) -> u64 {
        self.entries.get(key).map_or(0, |slot| slot.version())
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<StoredRecord>> {
        let _gate = self.commit_gate.read();
        Ok(self.entries.get(key).map(|slot| slot.clone()))
    }

    async fn apply(&self, batch: CommitBatch) -> Result<(), PersistenceError> {
        let _gate = self.commit_gate.write();

        if let Some(conflict) = first_conflict(&batch.checks, |key| Ok(self.current_version(key)))? {
            return Err(conflict);
        }

        for (key, change) in batch.changes {
            let current = self.entries.get(&key).map(|slot| slot.clone());
            if let Some(next) = StoredRecord::next(current.as_ref(), change) {
                self.entries.insert(key, next);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::storage::engine::conformance;
    use crate::storage::record::PendingChange;

    fn put(key: &str, value: serde_json::Value, expected: u64) -> CommitBatch {
        CommitBatch {
            unit_id: 1,
            checks: vec![(key.to_string(), expected)],
            changes: vec![(key.to_string(), PendingChange::Put(value))],
        }
    }

    #[tokio::test]
    async fn apply_then_load_round_trip() {
        let engine = MemoryEngine::new();
        assert!(engine.load("a").await.unwrap().is_none());

        engine.apply(put("a", json!(1), 0)).await.unwrap();
        let record = engine.load_live("a").await.unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.value, json!(1));

        engine.apply(put("a", json!(2), 1)).await.unwrap();
        assert_eq!(engine.load_live("a").await.unwrap().unwrap().version, 2);
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn stale_check_rejects_whole_batch() {
        let engine = MemoryEngine::new();
        engine.apply(put("a", json!(1), 0)).await.unwrap();

        let batch = CommitBatch {
            unit_id: 2,
            checks: vec![("b".to_string(), 0), ("a".to_string(), 0)],
            changes: vec![
                ("b".to_string(), PendingChange::Put(json!("b"))),
                ("a".to_string(), PendingChange::Put(json!("a"))),
            ],
        };
        let err = engine.apply(batch).await.unwrap_err();
        assert!(err.is_conflict());

        // Nothing from the rejected batch is visible.
        assert!(engine.load("b").await.unwrap().is_none());
        assert_eq!(engine.load_live("a").await.unwrap().unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn remove_leaves_tombstone() {
        let engine = MemoryEngine::new();
        engine.apply(put("a", json!(1), 0)).await.unwrap();

        let batch = CommitBatch {
            unit_id: 3,
            checks: vec![("a".to_string(), 1)],
            changes: vec![("a".to_string(), PendingChange::Remove)],
        };
        engine.apply(batch).await.unwrap();
        assert!(engine.load_live("a").await.unwrap().is_none());
        assert_eq!(
            engine.load("a").await.unwrap(),
            Some(StoredRecord::Tombstone { version: 2 })
        );
        assert!(engine.is_empty());
        assert!(engine.snapshot().is_empty());

        // Recreating continues from the tombstone instead of restarting at 1.
        engine.apply(put("a", json!(3), 2)).await.unwrap();
        assert_eq!(engine.load_live("a").await.unwrap().unwrap().version, 3);
    }

    #[tokio::test]
    async fn stale_reader_loses_to_delete_and_recreate() {
        conformance::stale_reader_loses_to_delete_and_recreate(Arc::new(MemoryEngine::new())).await;
    }

    #[tokio::test]
    async fn stale_reader_loses_to_delete() {
        conformance::stale_reader_loses_to_delete(Arc::new(MemoryEngine::new())).await;
    }

    #[tokio::test]
    async fn recreate_expecting_absent_continues_versions() {
        conformance::recreate_expecting_absent_continues_versions(Arc::new(MemoryEngine::new()))
            .await;
    }

    #[tokio::test]
    async fn snapshot_returns_all_entries() {
        let engine = MemoryEngine::new();
        engine.apply(put("a", json!(1), 0)).await.unwrap();
        engine.apply(put("b", json!(2), 0)).await.unwrap();

        let mut keys: Vec<String> = engine.snapshot().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
