//! Persistence layer for the dispatch core.
//!
//! - **Engine** ([`StorageEngine`]): opaque transactional key store that
//!   validates and applies commit batches atomically
//! - **Boundary** ([`PersistenceBoundary`]): unit-of-work discipline on top of
//!   an engine with read-your-writes and optimistic conflict detection
//!
//! Engines live in [`engines`]; [`open_engine`] picks one from a datasource
//! string.

pub mod boundary;
pub mod engine;
pub mod engines;
pub mod error;
pub mod factory;
pub mod record;
pub mod unit_of_work;

pub use boundary::{BoundaryStats, PersistenceBoundary, StatsSnapshot};
pub use engine::StorageEngine;
pub use error::PersistenceError;
pub use factory::open_engine;
pub use record::{CommitBatch, PendingChange, StoredRecord, Versioned};
pub use unit_of_work::{ChangeOp, ChangeResult, UnitOfWork, UnitState};
