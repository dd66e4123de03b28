//! Load shedding for the dispatch pipeline.
//!
//! Admission is a non-blocking permit acquire. A request that finds every
//! permit taken never reaches the dispatcher: it is answered in place with
//! [`DispatchResponse::overloaded`] (503 plus `Retry-After`) and counted in
//! `seatline_dispatch_shed_total`, labeled by the route pattern it would have
//! hit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::debug;

use crate::service::operation::OperationError;
use crate::service::request::{DispatchRequest, DispatchResponse};
use crate::service::router::RouteTable;

/// Shed-metric label for a request that matches no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Caps concurrent dispatches at `max_concurrent`; the excess is shed, not queued.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    permits: Arc<Semaphore>,
    routes: Arc<RouteTable>,
}

impl LoadShedLayer {
    /// `routes` is only consulted to label shed requests.
    #[must_use]
    pub fn new(max_concurrent: u32, routes: Arc<RouteTable>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent as usize)),
            routes,
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            permits: Arc::clone(&self.permits),
            routes: Arc::clone(&self.routes),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    permits: Arc<Semaphore>,
    routes: Arc<RouteTable>,
}

impl<S> LoadShedService<S> {
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    fn route_label(&self, request: &DispatchRequest) -> String {
        self.routes
            .resolve(&request.method, &request.path)
            .map_or_else(
                || UNMATCHED_ROUTE.to_string(),
                |resolved| resolved.handle.pattern().as_str().to_string(),
            )
    }
}

impl<S> Service<DispatchRequest> for LoadShedService<S>
where
    S: Service<DispatchRequest, Response = DispatchResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = DispatchResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<DispatchResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: DispatchRequest) -> Self::Future {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            let route = self.route_label(&request);
            debug!(request_id = %request.id, %route, "request shed");
            ::metrics::counter!("seatline_dispatch_shed_total", "route" => route).increment(1);
            let response = DispatchResponse::overloaded(request.id);
            return Box::pin(async move { Ok(response) });
        };

        let fut = self.inner.call(request);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use http::{Method, StatusCode};
    use serde_json::json;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use super::*;
    use crate::service::context::InvocationContext;
    use crate::service::operation::{Handler, Outcome};
    use crate::service::request::{ResponseKind, OVERLOADED_RETRY_AFTER};
    use crate::service::router::{RouteSpec, RouteTableBuilder};

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn call(&self, _ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
            Ok(Outcome::ok(json!(null)))
        }
    }

    fn routes() -> Arc<RouteTable> {
        let mut builder = RouteTableBuilder::new(Vec::new());
        builder.register(RouteSpec::get("/seats/{id}", Noop)).unwrap();
        Arc::new(builder.build())
    }

    /// Answers 204 once `release` is notified.
    #[derive(Clone)]
    struct Gate {
        release: Arc<Notify>,
    }

    impl Service<DispatchRequest> for Gate {
        type Response = DispatchResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<DispatchResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: DispatchRequest) -> Self::Future {
            let release = Arc::clone(&self.release);
            Box::pin(async move {
                release.notified().await;
                Ok(DispatchResponse::from_outcome(request.id, Outcome::no_content(), 1))
            })
        }
    }

    fn gate() -> (Gate, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        (Gate { release: Arc::clone(&release) }, release)
    }

    #[tokio::test]
    async fn admits_requests_under_limit() {
        let (inner, release) = gate();
        release.notify_one();
        let svc = LoadShedLayer::new(10, routes()).layer(inner);
        let response = svc
            .oneshot(DispatchRequest::new(Method::GET, "/seats/1"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn excess_request_is_answered_overloaded_without_dispatch() {
        let (inner, release) = gate();
        let mut svc = LoadShedLayer::new(1, routes()).layer(inner);

        let held = svc.call(DispatchRequest::new(Method::GET, "/seats/1"));
        assert_eq!(svc.available_permits(), 0);

        let shed = svc
            .call(DispatchRequest::new(Method::GET, "/seats/2"))
            .await
            .unwrap();
        assert_eq!(shed.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(shed.kind, ResponseKind::Overloaded);
        assert_eq!(shed.retry_after, Some(OVERLOADED_RETRY_AFTER));
        assert_eq!(shed.attempts, 0);

        release.notify_one();
        let admitted = tokio::time::timeout(Duration::from_secs(1), held)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admitted.status, StatusCode::NO_CONTENT);
        assert_eq!(svc.available_permits(), 1, "permit released on completion");
    }

    #[test]
    fn shed_requests_are_labeled_by_route_pattern() {
        let (inner, _release) = gate();
        let svc = LoadShedLayer::new(1, routes()).layer(inner);
        assert_eq!(
            svc.route_label(&DispatchRequest::new(Method::GET, "/seats/7")),
            "/seats/{id}"
        );
        assert_eq!(
            svc.route_label(&DispatchRequest::new(Method::POST, "/seats/7")),
            UNMATCHED_ROUTE
        );
    }
}
