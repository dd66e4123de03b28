//! Record types for the storage layer.
//!
//! Defines [`Versioned`], the live value callers see, [`StoredRecord`], the
//! slot an engine keeps per key (live or tombstone), and the [`CommitBatch`]
//! a unit of work hands to the engine when it commits.

use serde::{Deserialize, Serialize};

/// A committed value together with its optimistic-concurrency version.
///
/// Versions start at 1 for a freshly written key and increase by one on
/// every committed write or delete. A key that was never written is
/// version 0. A version is never assigned twice for the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub version: u64,
    pub value: serde_json::Value,
}

impl Versioned {
    /// Version observed for an optional record: 0 when absent.
    #[must_use]
    pub fn version_of(record: Option<&Versioned>) -> u64 {
        record.map_or(0, |r| r.version)
    }
}

/// What an engine holds for a key.
///
/// Deleting a live key leaves a tombstone at the next version, so a key that
/// is deleted and recreated keeps counting upward and a unit holding a
/// pre-delete version fails validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoredRecord {
    Live(Versioned),
    Tombstone { version: u64 },
}

impl StoredRecord {
    #[must_use]
    pub fn version(&self) -> u64 {
        match self {
            Self::Live(record) => record.version,
            Self::Tombstone { version } => *version,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    #[must_use]
    pub fn into_live(self) -> Option<Versioned> {
        match self {
            Self::Live(record) => Some(record),
            Self::Tombstone { .. } => None,
        }
    }

    /// Version an engine validates against: 0 when the key was never written.
    #[must_use]
    pub fn version_of(slot: Option<&StoredRecord>) -> u64 {
        slot.map_or(0, StoredRecord::version)
    }

    /// The slot that results from applying `change` on top of `current`, or
    /// `None` when the change leaves the slot as it is (deleting a key that
    /// is already absent).
    #[must_use]
    pub fn next(current: Option<&StoredRecord>, change: PendingChange) -> Option<StoredRecord> {
        let version = Self::version_of(current) + 1;
        match change {
            PendingChange::Put(value) => Some(Self::Live(Versioned { version, value })),
            PendingChange::Remove => current
                .is_some_and(StoredRecord::is_live)
                .then_some(Self::Tombstone { version }),
        }
    }
}

/// A pending change to a single key.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingChange {
    Put(serde_json::Value),
    Remove,
}

/// Everything an engine needs to validate and apply a commit atomically.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    /// Id of the unit of work being committed (for diagnostics).
    pub unit_id: u64,
    /// Keys whose current version must equal the given version.
    pub checks: Vec<(String, u64)>,
    /// Changes to apply once every check passes.
    pub changes: Vec<(String, PendingChange)>,
}

impl CommitBatch {
    /// A batch with no changes still validates its checks.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.changes.is_empty()
    }
}
