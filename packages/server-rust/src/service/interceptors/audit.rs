//! Audit trail of invocations at info level.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::post_phase_label;
use crate::service::chain::{CleanupReason, Flow, Interceptor};
use crate::service::context::InvocationContext;
use crate::service::operation::{OperationError, Outcome};

/// Logs every attempt's entry and the outcome its inner stages produced.
/// The settled outcome, after commit, is logged by the dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditInterceptor;

#[async_trait]
impl Interceptor for AuditInterceptor {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn has_cleanup(&self) -> bool {
        true
    }

    async fn before(&self, ctx: &mut InvocationContext) -> Result<Flow, OperationError> {
        info!(
            method = %ctx.method(),
            route = ctx.route(),
            attempt = ctx.attempt(),
            "invocation started"
        );
        Ok(Flow::Continue)
    }

    async fn after(
        &self,
        ctx: &mut InvocationContext,
        outcome: &mut Outcome,
    ) -> Result<(), OperationError> {
        debug!(
            method = %ctx.method(),
            route = ctx.route(),
            attempt = ctx.attempt(),
            outcome = post_phase_label(ctx, outcome),
            "attempt finished"
        );
        Ok(())
    }

    async fn cleanup(&self, ctx: &mut InvocationContext, reason: CleanupReason) {
        warn!(
            method = %ctx.method(),
            route = ctx.route(),
            attempt = ctx.attempt(),
            reason = reason.as_str(),
            "invocation aborted"
        );
    }
}
