//! Measures how long the inner stages of an invocation take.

use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::post_phase_label;
use crate::service::chain::{CleanupReason, Flow, Interceptor};
use crate::service::context::InvocationContext;
use crate::service::operation::{OperationError, Outcome};

/// When the timing interceptor entered the current attempt.
#[derive(Debug, Clone, Copy)]
pub struct TimingStart(pub Instant);

/// Records `seatline_operation_duration_seconds` per route and outcome.
///
/// Successes awaiting commit are labeled `pending_commit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingInterceptor;

impl TimingInterceptor {
    fn record(ctx: &mut InvocationContext, outcome: &'static str) -> Option<f64> {
        let TimingStart(start) = ctx.remove_attribute::<TimingStart>()?;
        let seconds = start.elapsed().as_secs_f64();
        metrics::histogram!(
            "seatline_operation_duration_seconds",
            "route" => ctx.route().to_string(),
            "outcome" => outcome
        )
        .record(seconds);
        Some(seconds)
    }
}

#[async_trait]
impl Interceptor for TimingInterceptor {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn has_cleanup(&self) -> bool {
        true
    }

    async fn before(&self, ctx: &mut InvocationContext) -> Result<Flow, OperationError> {
        ctx.insert_attribute(TimingStart(Instant::now()));
        Ok(Flow::Continue)
    }

    async fn after(
        &self,
        ctx: &mut InvocationContext,
        outcome: &mut Outcome,
    ) -> Result<(), OperationError> {
        let label = post_phase_label(ctx, outcome);
        if let Some(seconds) = Self::record(ctx, label) {
            debug!(
                route = ctx.route(),
                attempt = ctx.attempt(),
                outcome = label,
                duration_ms = seconds * 1000.0,
                "invocation timed"
            );
        }
        Ok(())
    }

    async fn cleanup(&self, ctx: &mut InvocationContext, reason: CleanupReason) {
        if let Some(seconds) = Self::record(ctx, reason.as_str()) {
            debug!(
                route = ctx.route(),
                reason = reason.as_str(),
                duration_ms = seconds * 1000.0,
                "invocation aborted"
            );
        }
    }
}
