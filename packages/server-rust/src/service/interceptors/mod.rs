//! Built-in interceptors.
//!
//! - [`timing`]: invocation duration histogram and trace event
//! - [`audit`]: entry and outcome log lines
//! - [`validation`]: pre-only request body checks
//!
//! Post-phase hooks run before the dispatcher commits, so a success they see
//! is provisional. They label it [`PENDING_COMMIT`]; the dispatcher records
//! the settled outcome once the commit has decided it.

use crate::service::context::InvocationContext;
use crate::service::operation::Outcome;

pub mod audit;
pub mod timing;
pub mod validation;

pub use audit::AuditInterceptor;
pub use timing::TimingInterceptor;
pub use validation::{JsonBodyInterceptor, NonEmptyBodyInterceptor};

/// Post-phase label for a success whose unit of work has not committed yet.
pub const PENDING_COMMIT: &str = "pending_commit";

/// Outcome label a post-phase hook should record.
#[must_use]
pub fn post_phase_label(ctx: &InvocationContext, outcome: &Outcome) -> &'static str {
    if outcome.is_success() && ctx.commit_pending() {
        PENDING_COMMIT
    } else {
        outcome.kind()
    }
}
