//! Persistence boundary: unit-of-work discipline over a [`StorageEngine`].
//!
//! The boundary owns the optimistic-concurrency protocol:
//!
//! 1. `begin()` hands out an active [`UnitOfWork`]
//! 2. `execute()` serves reads (own staged changes first, then the engine)
//!    and stages writes, recording the version of every key it touches
//! 3. `commit()` asks the engine to validate those versions and apply the
//!    staged changes atomically; a mismatch is a [`PersistenceError::Conflict`]
//!    and leaves the unit active for the caller to roll back
//! 4. `rollback()` discards staged changes; it is idempotent
//!
//! Exactly one unit per invocation is enforced by the dispatcher, not here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use super::engine::StorageEngine;
use super::error::PersistenceError;
use super::record::PendingChange;
use super::unit_of_work::{ChangeOp, ChangeResult, Observation, UnitOfWork, UnitState};

/// Counters describing unit-of-work traffic through a boundary.
#[derive(Debug, Default)]
pub struct BoundaryStats {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    conflicts: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`BoundaryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub conflicts: u64,
    /// Units rolled back by the drop-time safety net.
    pub abandoned: u64,
}

impl BoundaryStats {
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_rollback(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("seatline_uow_total", "outcome" => "rolled_back").increment(1);
    }

    pub(crate) fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }
}

/// Transactional unit-of-work wrapper around a storage engine.
pub struct PersistenceBoundary {
    engine: Arc<dyn StorageEngine>,
    next_id: AtomicU64,
    stats: Arc<BoundaryStats>,
}

impl PersistenceBoundary {
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            next_id: AtomicU64::new(1),
            stats: Arc::new(BoundaryStats::default()),
        }
    }

    /// The underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Opens a new unit of work.
    ///
    /// # Errors
    ///
    /// The in-tree engines never fail here; the signature leaves room for
    /// engines that reserve resources on begin.
    #[allow(clippy::unused_async)]
    pub async fn begin(&self) -> Result<UnitOfWork, PersistenceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.stats.begun.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("seatline_uow_total", "outcome" => "begun").increment(1);
        trace!(unit_id = id, engine = self.engine.name(), "unit of work begun");
        Ok(UnitOfWork::new(id, Arc::clone(&self.stats)))
    }

    /// Executes a single change inside `unit`.
    ///
    /// Writes and deletes are staged; the committed store is untouched until
    /// [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotActive`] for a finished unit and
    /// [`PersistenceError::Backend`] when the engine fails to load.
    pub async fn execute(
        &self,
        unit: &mut UnitOfWork,
        op: ChangeOp,
    ) -> Result<ChangeResult, PersistenceError> {
        unit.ensure_active()?;
        match op {
            ChangeOp::Read { key } => {
                if let Some(view) = unit.staged_view(&key) {
                    return Ok(ChangeResult::Value(view));
                }
                let slot = self.engine.load(&key).await?;
                unit.record_read(&key, Observation::of(slot.as_ref()));
                Ok(ChangeResult::Value(slot.and_then(|slot| slot.into_live())))
            }
            ChangeOp::Write {
                key,
                value,
                expected_version,
            } => {
                if let Some(version) = expected_version {
                    unit.expect(&key, version);
                }
                let seen = self.observe(unit, &key).await?;
                unit.stage(&key, PendingChange::Put(value));
                Ok(ChangeResult::Written {
                    key,
                    version: seen.version + 1,
                })
            }
            ChangeOp::Delete {
                key,
                expected_version,
            } => {
                if let Some(version) = expected_version {
                    unit.expect(&key, version);
                }
                let seen = self.observe(unit, &key).await?;
                let existed = match unit.pending(&key) {
                    Some(PendingChange::Put(_)) => true,
                    Some(PendingChange::Remove) => false,
                    None => seen.live,
                };
                unit.stage(&key, PendingChange::Remove);
                Ok(ChangeResult::Deleted { key, existed })
            }
        }
    }

    /// Makes sure the unit has observed `key`, loading it if necessary, and
    /// returns the first observation.
    async fn observe(
        &self,
        unit: &mut UnitOfWork,
        key: &str,
    ) -> Result<Observation, PersistenceError> {
        if let Some(seen) = unit.observed(key) {
            return Ok(seen);
        }
        let seen = Observation::of(self.engine.load(key).await?.as_ref());
        unit.record_read(key, seen);
        Ok(seen)
    }

    /// Commits `unit`.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Conflict`] when a recorded version is stale; the
    ///   unit stays active and the caller must [`rollback`](Self::rollback)
    /// - [`PersistenceError::NotActive`] when the unit is already finished
    /// - [`PersistenceError::Backend`] on engine failure (unit stays active)
    pub async fn commit(&self, unit: &mut UnitOfWork) -> Result<(), PersistenceError> {
        unit.ensure_active()?;
        let batch = unit.to_batch();
        let changes = batch.changes.len();

        match self.engine.apply(batch).await {
            Ok(()) => {
                unit.mark_committed();
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("seatline_uow_total", "outcome" => "committed").increment(1);
                debug!(unit_id = unit.id(), changes, "unit of work committed");
                Ok(())
            }
            Err(err) => {
                if err.is_conflict() {
                    self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("seatline_uow_total", "outcome" => "conflict").increment(1);
                    debug!(unit_id = unit.id(), error = %err, "commit rejected");
                }
                Err(err)
            }
        }
    }

    /// Rolls back `unit`. Safe on an active unit, a no-op on a rolled-back one.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotActive`] for a committed unit.
    #[allow(clippy::unused_async)]
    pub async fn rollback(&self, unit: &mut UnitOfWork) -> Result<(), PersistenceError> {
        match unit.state() {
            UnitState::Active => {
                unit.discard();
                debug!(unit_id = unit.id(), "unit of work rolled back");
                Ok(())
            }
            UnitState::RolledBack => Ok(()),
            UnitState::Committed => Err(PersistenceError::NotActive {
                id: unit.id(),
                state: UnitState::Committed,
            }),
        }
    }
}
