//! Interception chain: ordered wrappers around handler invocation.
//!
//! Pre-phase hooks run in registration order, post-phase hooks in exact
//! reverse order. The chain keeps the indices of entered interceptors in the
//! [`InvocationContext`] so that a fault, or a cancellation that drops the
//! chain mid-flight, can run the cleanup hooks of exactly those interceptors.

use std::sync::Arc;

use async_trait::async_trait;

use super::context::InvocationContext;
use super::operation::{Handler, OperationError, Outcome};

/// What a pre-phase hook decided.
#[derive(Debug)]
pub enum Flow {
    Continue,
    /// Short-circuit with this outcome; inner stages never run.
    Respond(Outcome),
}

/// Why cleanup hooks are running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    Fault,
    Cancelled,
}

impl CleanupReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fault => "fault",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Cross-cutting policy applied around many invocations concurrently.
///
/// Implementations hold no per-request state; anything an interceptor needs
/// to carry from `before` to `after` goes into the context's attributes.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Whether [`cleanup`](Self::cleanup) should run on fault or
    /// cancellation. Pre-only interceptors leave this `false`.
    fn has_cleanup(&self) -> bool {
        false
    }

    async fn before(&self, _ctx: &mut InvocationContext) -> Result<Flow, OperationError> {
        Ok(Flow::Continue)
    }

    /// Runs with the outcome of the inner stages and may replace it.
    async fn after(
        &self,
        _ctx: &mut InvocationContext,
        _outcome: &mut Outcome,
    ) -> Result<(), OperationError> {
        Ok(())
    }

    async fn cleanup(&self, _ctx: &mut InvocationContext, _reason: CleanupReason) {}
}

/// An ordered, immutable list of interceptors bound to one route.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Runs the chain around `inner`.
    ///
    /// # Errors
    ///
    /// Propagates the first fault after running cleanup hooks of every
    /// entered interceptor that declares one. Faults raised by an
    /// interceptor hook come back as [`OperationError::Interceptor`] naming it.
    pub async fn invoke(
        &self,
        ctx: &mut InvocationContext,
        inner: &dyn Handler,
    ) -> Result<Outcome, OperationError> {
        ctx.entered.clear();

        let mut short_circuit = None;
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            ctx.entered.push(index);
            match interceptor.before(ctx).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Respond(outcome)) => {
                    // The short-circuiting interceptor skips its own post-phase.
                    ctx.entered.pop();
                    short_circuit = Some(outcome);
                    break;
                }
                Err(err) => {
                    self.unwind(ctx, CleanupReason::Fault).await;
                    return Err(attribute(interceptor.as_ref(), err));
                }
            }
        }

        let mut outcome = match short_circuit {
            Some(outcome) => outcome,
            None => match inner.call(ctx).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.unwind(ctx, CleanupReason::Fault).await;
                    return Err(err);
                }
            },
        };

        while let Some(&index) = ctx.entered.last() {
            let Some(interceptor) = self.interceptors.get(index) else {
                ctx.entered.pop();
                continue;
            };
            let result = interceptor.after(ctx, &mut outcome).await;
            ctx.entered.pop();
            if let Err(err) = result {
                self.unwind(ctx, CleanupReason::Fault).await;
                return Err(attribute(interceptor.as_ref(), err));
            }
        }

        Ok(outcome)
    }

    /// Runs cleanup for a chain that was dropped mid-flight.
    pub async fn cancel(&self, ctx: &mut InvocationContext) {
        self.unwind(ctx, CleanupReason::Cancelled).await;
    }

    async fn unwind(&self, ctx: &mut InvocationContext, reason: CleanupReason) {
        while let Some(index) = ctx.entered.pop() {
            if let Some(interceptor) = self.interceptors.get(index) {
                if interceptor.has_cleanup() {
                    interceptor.cleanup(ctx, reason).await;
                }
            }
        }
    }
}

fn attribute(interceptor: &dyn Interceptor, err: OperationError) -> OperationError {
    match err {
        OperationError::Interceptor { .. } => err,
        err => OperationError::Interceptor {
            name: interceptor.name(),
            source: err.into(),
        },
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
