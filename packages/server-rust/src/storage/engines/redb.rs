//! Embedded on-disk [`StorageEngine`] backed by [`redb`].
//!
//! Records live in a single `records` table mapping key to a MessagePack
//! encoded [`StoredRecord`]; deletes write a tombstone rather than removing
//! the row. redb serializes write transactions, so validation
//! and application of a commit batch happen inside one write transaction.
//! All redb calls block, so they run on the tokio blocking pool.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use crate::storage::engine::{first_conflict, StorageEngine};
use crate::storage::error::PersistenceError;
use crate::storage::record::{CommitBatch, StoredRecord};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// redb-backed versioned key store.
pub struct RedbEngine {
    db: Arc<Database>,
}

impl RedbEngine {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the table cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("failed to open redb database at {}", path.display()))?;

        let txn = db.begin_write()?;
        {
            txn.open_table(RECORDS)?;
        }
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }
}

fn decode(bytes: &[u8]) -> anyhow::Result<StoredRecord> {
    rmp_serde::from_slice(bytes).context("corrupt record encoding")
}

fn encode(record: &StoredRecord) -> anyhow::Result<Vec<u8>> {
    rmp_serde::to_vec_named(record).context("failed to encode record")
}

fn current_slot(
    table: &redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<StoredRecord>, PersistenceError> {
    match table.get(key).map_err(anyhow::Error::from)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn load_blocking(db: &Database, key: &str) -> anyhow::Result<Option<StoredRecord>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(RECORDS)?;
    let record = match table.get(key)? {
        Some(guard) => Some(decode(guard.value())?),
        None => None,
    };
    Ok(record)
}

fn apply_blocking(db: &Database, batch: &CommitBatch) -> Result<(), PersistenceError> {
    let txn = db.begin_write().map_err(anyhow::Error::from)?;
    {
        let mut table = txn.open_table(RECORDS).map_err(anyhow::Error::from)?;

        let conflict = first_conflict(&batch.checks, |key| {
            Ok(StoredRecord::version_of(current_slot(&table, key)?.as_ref()))
        })?;
        if let Some(conflict) = conflict {
            drop(table);
            txn.abort().map_err(anyhow::Error::from)?;
            return Err(conflict);
        }

        for (key, change) in &batch.changes {
            let current = current_slot(&table, key)?;
            if let Some(next) = StoredRecord::next(current.as_ref(), change.clone()) {
                let bytes = encode(&next)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(anyhow::Error::from)?;
            }
        }
    }
    txn.commit().map_err(anyhow::Error::from)?;
    Ok(())
}

#[async_trait]
impl StorageEngine for RedbEngine {
    fn name(&self) -> &'static str {
        "redb"
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<StoredRecord>> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || load_blocking(&db, &key)).await?
    }

    async fn apply(&self, batch: CommitBatch) -> Result<(), PersistenceError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || apply_blocking(&db, &batch))
            .await
            .map_err(anyhow::Error::from)?
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::engine::conformance;
    use crate::storage::record::PendingChange;

    fn open_temp() -> (tempfile::TempDir, Arc<RedbEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let engine = RedbEngine::open(dir.path().join("seatline.redb")).unwrap();
        (dir, Arc::new(engine))
    }

    fn put(key: &str, value: serde_json::Value, expected: u64) -> CommitBatch {
        CommitBatch {
            unit_id: 1,
            checks: vec![(key.to_string(), expected)],
            changes: vec![(key.to_string(), PendingChange::Put(value))],
        }
    }

    #[tokio::test]
    async fn apply_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RedbEngine::open(dir.path().join("seatline.redb")).unwrap();

        assert!(engine.load("a").await.unwrap().is_none());
        engine.apply(put("a", json!({"n": 1}), 0)).await.unwrap();
        engine.apply(put("a", json!({"n": 2}), 1)).await.unwrap();

        let record = engine.load_live("a").await.unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.value, json!({"n": 2}));
    }

    #[tokio::test]
    async fn conflict_leaves_database_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RedbEngine::open(dir.path().join("seatline.redb")).unwrap();
        engine.apply(put("a", json!(1), 0)).await.unwrap();

        let batch = CommitBatch {
            unit_id: 2,
            checks: vec![("a".to_string(), 0)],
            changes: vec![
                ("a".to_string(), PendingChange::Put(json!(9))),
                ("b".to_string(), PendingChange::Put(json!(9))),
            ],
        };
        let err = engine.apply(batch).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(engine.load_live("a").await.unwrap().unwrap().value, json!(1));
        assert!(engine.load("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seatline.redb");
        {
            let engine = RedbEngine::open(&path).unwrap();
            engine.apply(put("hall/main", json!({"rows": 2}), 0)).await.unwrap();
        }

        let engine = RedbEngine::open(&path).unwrap();
        let record = engine.load_live("hall/main").await.unwrap().unwrap();
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn remove_leaves_tombstone_that_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seatline.redb");
        {
            let engine = RedbEngine::open(&path).unwrap();
            engine.apply(put("a", json!(1), 0)).await.unwrap();

            let batch = CommitBatch {
                unit_id: 3,
                checks: vec![("a".to_string(), 1)],
                changes: vec![("a".to_string(), PendingChange::Remove)],
            };
            engine.apply(batch).await.unwrap();
            assert!(engine.load_live("a").await.unwrap().is_none());
        }

        let engine = RedbEngine::open(&path).unwrap();
        assert_eq!(
            engine.load("a").await.unwrap(),
            Some(StoredRecord::Tombstone { version: 2 })
        );
        engine.apply(put("a", json!(null), 2)).await.unwrap();
        let record = engine.load_live("a").await.unwrap().unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.value, json!(null));
    }

    #[tokio::test]
    async fn stale_reader_loses_to_delete_and_recreate() {
        let (_dir, engine) = open_temp();
        conformance::stale_reader_loses_to_delete_and_recreate(engine).await;
    }

    #[tokio::test]
    async fn stale_reader_loses_to_delete() {
        let (_dir, engine) = open_temp();
        conformance::stale_reader_loses_to_delete(engine).await;
    }

    #[tokio::test]
    async fn recreate_expecting_absent_continues_versions() {
        let (_dir, engine) = open_temp();
        conformance::recreate_expecting_absent_continues_versions(engine).await;
    }
}
