//! Unit of work: one transactional scope over the persistence boundary.
//!
//! A [`UnitOfWork`] buffers changes locally and records the version of every
//! key it observes. Nothing reaches the engine until commit, when the engine
//! validates the recorded versions and applies the buffered changes
//! atomically. Rolling back therefore never touches the engine, which is what
//! makes the drop-time safety net synchronous.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::boundary::BoundaryStats;
use super::error::PersistenceError;
use super::record::{CommitBatch, PendingChange, StoredRecord, Versioned};

/// Lifecycle state of a unit of work.
///
/// State machine: Active -> (Committed | RolledBack)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Active,
    Committed,
    RolledBack,
}

impl UnitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change request executed inside a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOp {
    Read {
        key: String,
    },
    /// Write `value`. With `expected_version`, the commit additionally
    /// requires the key to be at that version (0 = absent).
    Write {
        key: String,
        value: serde_json::Value,
        expected_version: Option<u64>,
    },
    Delete {
        key: String,
        expected_version: Option<u64>,
    },
}

impl ChangeOp {
    pub fn read(key: impl Into<String>) -> Self {
        Self::Read { key: key.into() }
    }

    pub fn write(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::Write {
            key: key.into(),
            value,
            expected_version: None,
        }
    }

    pub fn write_expecting(key: impl Into<String>, value: serde_json::Value, version: u64) -> Self {
        Self::Write {
            key: key.into(),
            value,
            expected_version: Some(version),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete {
            key: key.into(),
            expected_version: None,
        }
    }

    pub fn delete_expecting(key: impl Into<String>, version: u64) -> Self {
        Self::Delete {
            key: key.into(),
            expected_version: Some(version),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Read { key } | Self::Write { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// Typed result of a [`ChangeOp`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeResult {
    /// Result of a read: the value as this unit of work sees it.
    Value(Option<Versioned>),
    /// The write is staged; `version` is what the key will hold once committed.
    Written { key: String, version: u64 },
    Deleted { key: String, existed: bool },
}

/// What a unit saw for a key the first time it touched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Observation {
    /// Slot version, tombstones included; validated at commit.
    pub(crate) version: u64,
    pub(crate) live: bool,
}

impl Observation {
    pub(crate) fn of(slot: Option<&StoredRecord>) -> Self {
        Self {
            version: StoredRecord::version_of(slot),
            live: slot.is_some_and(StoredRecord::is_live),
        }
    }

    #[cfg(test)]
    pub(crate) fn live(version: u64) -> Self {
        Self { version, live: true }
    }
}

/// One transactional scope. Obtained from
/// [`PersistenceBoundary::begin`](super::PersistenceBoundary::begin).
#[derive(Debug)]
pub struct UnitOfWork {
    id: u64,
    state: UnitState,
    /// First observation of every key touched.
    reads: BTreeMap<String, Observation>,
    /// Live versions demanded by `expected_version` arguments (0 = absent).
    expected: BTreeMap<String, u64>,
    pending: BTreeMap<String, PendingChange>,
    stats: Arc<BoundaryStats>,
}

impl UnitOfWork {
    pub(crate) fn new(id: u64, stats: Arc<BoundaryStats>) -> Self {
        Self {
            id,
            state: UnitState::Active,
            reads: BTreeMap::new(),
            expected: BTreeMap::new(),
            pending: BTreeMap::new(),
            stats,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> UnitState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == UnitState::Active
    }

    /// Number of keys with a staged change.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn ensure_active(&self) -> Result<(), PersistenceError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(PersistenceError::NotActive {
                id: self.id,
                state: self.state,
            })
        }
    }

    pub(crate) fn pending(&self, key: &str) -> Option<&PendingChange> {
        self.pending.get(key)
    }

    pub(crate) fn observed(&self, key: &str) -> Option<Observation> {
        self.reads.get(key).copied()
    }

    /// Records what was seen for `key`. Only the first observation counts:
    /// that is the version the commit validates against.
    pub(crate) fn record_read(&mut self, key: &str, observation: Observation) {
        self.reads.entry(key.to_string()).or_insert(observation);
    }

    pub(crate) fn expect(&mut self, key: &str, version: u64) {
        self.expected.insert(key.to_string(), version);
    }

    pub(crate) fn stage(&mut self, key: &str, change: PendingChange) {
        self.pending.insert(key.to_string(), change);
    }

    /// View of `key` as this unit sees it, if it has a staged change.
    pub(crate) fn staged_view(&self, key: &str) -> Option<Option<Versioned>> {
        self.pending.get(key).map(|change| match change {
            PendingChange::Put(value) => Some(Versioned {
                version: self.observed(key).map_or(0, |seen| seen.version) + 1,
                value: value.clone(),
            }),
            PendingChange::Remove => None,
        })
    }

    /// Builds the commit batch. An expectation of 0 ("absent") is checked
    /// against the observed slot when that slot was a tombstone, since
    /// callers never see tombstone versions.
    pub(crate) fn to_batch(&self) -> CommitBatch {
        let reads = self
            .reads
            .iter()
            .map(|(key, seen)| (key.clone(), seen.version));
        let expectations = self.expected.iter().map(|(key, &version)| {
            let check = match self.reads.get(key) {
                Some(seen) if version == 0 && !seen.live => seen.version,
                _ => version,
            };
            (key.clone(), check)
        });
        let checks = reads.chain(expectations).collect();
        let changes = self
            .pending
            .iter()
            .map(|(key, change)| (key.clone(), change.clone()))
            .collect();
        CommitBatch {
            unit_id: self.id,
            checks,
            changes,
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = UnitState::Committed;
        self.pending.clear();
    }

    /// Discards staged changes. Returns `true` if the unit was active.
    pub(crate) fn discard(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = UnitState::RolledBack;
        self.pending.clear();
        self.reads.clear();
        self.expected.clear();
        self.stats.record_rollback();
        true
    }

    /// Safety-net rollback for a unit whose owner forgot to finish it.
    pub(crate) fn abandon(&mut self) {
        if self.discard() {
            self.stats.record_abandoned();
            warn!(
                unit_id = self.id,
                "unit of work dropped while active; rolled back by safety net (programming error)"
            );
        }
    }
}
