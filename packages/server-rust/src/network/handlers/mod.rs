//! HTTP handlers and the shared state they extract.

pub mod dispatch;
pub mod health;

pub use dispatch::dispatch_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::service::DispatchPipeline;
use crate::storage::PersistenceBoundary;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc`s and a cloneable service stack, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Layered dispatch service; cloned per request.
    pub pipeline: DispatchPipeline,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Reported by the health endpoint.
    pub boundary: Arc<PersistenceBoundary>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
