use std::sync::Arc;
use std::time::Duration;

use super::chain::Interceptor;
use super::interceptors::{AuditInterceptor, TimingInterceptor};
use super::retry::RetryPolicy;

/// Interceptors the dispatcher can wrap around every route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinInterceptor {
    Timing,
    Audit,
}

impl BuiltinInterceptor {
    #[must_use]
    pub fn build(self) -> Arc<dyn Interceptor> {
        match self {
            Self::Timing => Arc::new(TimingInterceptor),
            Self::Audit => Arc::new(AuditInterceptor),
        }
    }
}

/// Dispatcher configuration.
///
/// Controls commit-conflict retries, the per-operation deadline, load
/// shedding and the interceptors applied to every route.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub retry: RetryPolicy,
    /// Deadline stamped on requests that arrive without one. `None` disables it.
    pub operation_timeout: Option<Duration>,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Global interceptors, outermost first.
    pub global_interceptors: Vec<BuiltinInterceptor>,
}

impl DispatchConfig {
    #[must_use]
    pub fn build_global_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        self.global_interceptors
            .iter()
            .map(|builtin| builtin.build())
            .collect()
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            operation_timeout: Some(Duration::from_secs(30)),
            max_concurrent_operations: 1000,
            global_interceptors: vec![BuiltinInterceptor::Timing, BuiltinInterceptor::Audit],
        }
    }
}
