//! Interception-aware dispatch core.
//!
//! This module implements the request-processing pipeline:
//!
//! 1. **Routing** (`router`): `(method, path)` -> `OperationHandle` + route params
//! 2. **Middleware** (`middleware`): Tower layers (load shedding, deadline, metrics)
//! 3. **Dispatch** (`dispatcher`): runs the chain, owns commit/rollback and retry
//! 4. **Interception** (`chain`, `interceptors`): ordered pre/post/cleanup hooks
//! 5. **Domain routes** (`domain`): items and cinema ticketing

pub mod chain;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod domain;
pub mod interceptors;
pub mod middleware;
pub mod operation;
pub mod request;
pub mod retry;
pub mod router;

// Re-export key types for convenient access.
pub use chain::{CleanupReason, Flow, Interceptor, InterceptorChain};
pub use config::{BuiltinInterceptor, DispatchConfig};
pub use context::InvocationContext;
pub use dispatcher::Dispatcher;
pub use middleware::{build_dispatch_pipeline, DispatchPipeline};
pub use operation::{Handler, OperationError, OperationHandle, Outcome, RequestState};
pub use request::{DispatchRequest, DispatchResponse, ResponseKind};
pub use retry::RetryPolicy;
pub use router::{ResolvedRoute, RouteError, RoutePattern, RouteSpec, RouteTable, RouteTableBuilder};
