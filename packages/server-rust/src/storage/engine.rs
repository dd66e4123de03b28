//! Storage engine trait: the opaque transactional key store underneath the
//! persistence boundary.
//!
//! Engines only know two things: how to load the committed slot of a key
//! (live record or tombstone) and how to validate-and-apply a [`CommitBatch`]
//! atomically. Buffering, read-your-writes and unit-of-work state live in the
//! boundary.

use async_trait::async_trait;

use super::error::PersistenceError;
use super::record::{CommitBatch, StoredRecord, Versioned};

/// Opaque transactional key store.
///
/// Wrapped in `Arc<dyn StorageEngine>` for sharing across async boundaries.
/// Implementations must not block the calling async worker: engines backed by
/// blocking I/O move their work onto the blocking pool.
#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    /// Short engine name for logs and health output.
    fn name(&self) -> &'static str;

    /// Load the committed slot for `key`, tombstones included. `None` means
    /// the key was never written.
    async fn load(&self, key: &str) -> anyhow::Result<Option<StoredRecord>>;

    /// Load the live record for `key`; tombstones read as absent.
    async fn load_live(&self, key: &str) -> anyhow::Result<Option<Versioned>> {
        Ok(self.load(key).await?.and_then(StoredRecord::into_live))
    }

    /// Validate every check in `batch` against the committed slot versions
    /// and, if all pass, apply every change with [`StoredRecord::next`].
    /// Either everything applies or nothing does.
    ///
    /// Returns [`PersistenceError::Conflict`] for the first failing check.
    async fn apply(&self, batch: CommitBatch) -> Result<(), PersistenceError>;
}

/// Returns the first check whose expected version differs from the current one.
pub(crate) fn first_conflict(
    checks: &[(String, u64)],
    mut current_version: impl FnMut(&str) -> Result<u64, PersistenceError>,
) -> Result<Option<PersistenceError>, PersistenceError> {
    for (key, expected) in checks {
        let actual = current_version(key)?;
        if actual != *expected {
            return Ok(Some(PersistenceError::Conflict {
                key: key.clone(),
                expected: *expected,
                actual,
            }));
        }
    }
    Ok(None)
}
