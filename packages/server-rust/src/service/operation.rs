//! Operation types shared by the router, the interception chain and the
//! dispatcher: outcomes, faults, handlers, handles and the per-request
//! lifecycle state machine.

use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::Value;

use super::chain::InterceptorChain;
use super::context::InvocationContext;
use super::router::RoutePattern;
use crate::storage::PersistenceError;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Structured result of a chain invocation: success or a recovered failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { status: StatusCode, body: Value },
    NotFound(String),
    ValidationFailure(String),
    /// A business rule refused the request.
    Rejected(String),
    /// Commit conflicts persisted through every retry.
    PersistenceConflict { attempts: u32 },
}

impl Outcome {
    /// `200 OK` with `body`.
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self::Success {
            status: StatusCode::OK,
            body,
        }
    }

    /// `201 Created` with `body`.
    #[must_use]
    pub fn created(body: Value) -> Self {
        Self::Success {
            status: StatusCode::CREATED,
            body,
        }
    }

    /// `204 No Content`.
    #[must_use]
    pub fn no_content() -> Self {
        Self::Success {
            status: StatusCode::NO_CONTENT,
            body: Value::Null,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::ValidationFailure(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Only successes are committed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Stable snake-case name used in logs, metrics and error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::NotFound(_) => "not_found",
            Self::ValidationFailure(_) => "validation_failure",
            Self::Rejected(_) => "rejected",
            Self::PersistenceConflict { .. } => "persistence_conflict",
        }
    }
}

// ---------------------------------------------------------------------------
// OperationError
// ---------------------------------------------------------------------------

/// Unexpected faults. Caught only by the dispatcher, which rolls back and
/// answers with a generic 500.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
    #[error("interceptor `{name}` failed: {source}")]
    Interceptor {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("operation touched persistence on a non-transactional route")]
    NoUnitOfWork,
    #[error("a unit of work is already open for this invocation")]
    UnitAlreadyOpen,
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Business logic bound to a route.
///
/// Handlers report recoverable failures as [`Outcome`] variants and reserve
/// `Err` for faults.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError>;
}

// ---------------------------------------------------------------------------
// OperationHandle
// ---------------------------------------------------------------------------

/// Immutable route descriptor, built once at registration and shared by
/// every concurrent invocation.
pub struct OperationHandle {
    method: Method,
    pattern: RoutePattern,
    handler: Arc<dyn Handler>,
    chain: InterceptorChain,
    transactional: bool,
}

impl OperationHandle {
    pub(crate) fn new(
        method: Method,
        pattern: RoutePattern,
        handler: Arc<dyn Handler>,
        chain: InterceptorChain,
        transactional: bool,
    ) -> Self {
        Self {
            method,
            pattern,
            handler,
            chain,
            transactional,
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    #[must_use]
    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("interceptors", &self.chain.names())
            .field("transactional", &self.transactional)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RequestState
// ---------------------------------------------------------------------------

/// Lifecycle of one request inside the dispatcher.
///
/// ```text
/// Received -> Routed -> Executing -> [TxOpen] -> Completed | Failed -> Responded
/// Received -> Responded            (routing failure)
/// Completed -> Executing           (commit-conflict retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Routed,
    Executing,
    TxOpen,
    Completed,
    Failed,
    Responded,
}

impl RequestState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use RequestState::{Completed, Executing, Failed, Received, Responded, Routed, TxOpen};
        matches!(
            (self, next),
            (Received, Routed | Responded)
                | (Routed | Completed, Executing)
                | (Executing, TxOpen)
                | (Executing | TxOpen, Completed | Failed)
                | (Completed | Failed, Responded)
                // cancellation can land at any point after routing
                | (Routed | Executing | TxOpen, Responded)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
