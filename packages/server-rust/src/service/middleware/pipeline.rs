//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::deadline::{DeadlineLayer, DeadlineService};
use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::service::config::DispatchConfig;
use crate::service::dispatcher::Dispatcher;

/// The fully layered dispatch service handed to the transport.
pub type DispatchPipeline = LoadShedService<DeadlineService<MetricsService<Dispatcher>>>;

/// Build the dispatch pipeline by wrapping the `Dispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- answer 503 when overloaded, before doing any work
/// 2. `DeadlineLayer` -- stamp the per-request deadline
/// 3. `MetricsLayer` -- record timing and outcome (closest to the dispatcher)
///
/// The returned service implements `tower::Service<DispatchRequest>`.
#[must_use]
pub fn build_dispatch_pipeline(dispatcher: Dispatcher, config: &DispatchConfig) -> DispatchPipeline {
    let routes = Arc::clone(dispatcher.routes());
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_operations, routes))
        .layer(DeadlineLayer::new(config.operation_timeout))
        .layer(MetricsLayer)
        .service(dispatcher)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::service::domain::items;
    use crate::service::request::DispatchRequest;
    use crate::service::router::RouteTableBuilder;
    use crate::storage::engines::MemoryEngine;
    use crate::storage::PersistenceBoundary;

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let config = DispatchConfig {
            max_concurrent_operations: 100,
            ..DispatchConfig::default()
        };
        let mut builder = RouteTableBuilder::new(config.build_global_interceptors());
        builder.register_all(items::routes()).unwrap();
        let boundary = Arc::new(PersistenceBoundary::new(Arc::new(MemoryEngine::new())));
        let dispatcher = Dispatcher::new(builder.build(), boundary, &config);

        let svc = build_dispatch_pipeline(dispatcher, &config);
        let resp = svc
            .oneshot(DispatchRequest::new(Method::GET, "/items/missing"))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
    }
}
