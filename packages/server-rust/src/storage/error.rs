//! Errors raised by the persistence boundary and storage engines.

use super::unit_of_work::UnitState;

/// Errors returned by [`PersistenceBoundary`](super::PersistenceBoundary)
/// and [`StorageEngine`](super::StorageEngine) implementations.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Commit-time optimistic version mismatch. The unit stays active and
    /// must be rolled back by the caller.
    #[error("write conflict on key `{key}`: expected version {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },
    #[error("unit of work {id} is {state}, not active")]
    NotActive { id: u64, state: UnitState },
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl PersistenceError {
    /// Whether the failure is a retryable write conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = PersistenceError::Conflict {
            key: "k".to_string(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_conflict());
        assert_eq!(
            conflict.to_string(),
            "write conflict on key `k`: expected version 1, found 2"
        );

        let inactive = PersistenceError::NotActive {
            id: 3,
            state: UnitState::Committed,
        };
        assert!(!inactive.is_conflict());
        assert_eq!(inactive.to_string(), "unit of work 3 is committed, not active");

        let backend = PersistenceError::from(anyhow::anyhow!("disk full"));
        assert!(!backend.is_conflict());
    }
}
