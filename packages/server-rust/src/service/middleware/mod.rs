//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`deadline`]: Per-request deadline stamping
//! - [`metrics`]: Request timing and counting via `tracing` spans and `metrics`
//! - [`load_shed`]: Concurrency cap that answers the excess with 503
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod deadline;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use deadline::DeadlineLayer;
pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, DispatchPipeline};
