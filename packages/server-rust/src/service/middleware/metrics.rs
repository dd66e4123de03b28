//! Metrics middleware for dispatch requests.
//!
//! Records request duration and outcome on a `tracing` span and through the
//! `metrics` facade (`seatline_dispatch_total`,
//! `seatline_dispatch_duration_seconds`).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::OperationError;
use crate::service::request::{DispatchRequest, DispatchResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments requests with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records request duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<DispatchRequest> for MetricsService<S>
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
        let method = request.method.to_string();
        let request_id = request.id;

        let span = info_span!(
            "request",
            %request_id,
            method = %method,
            duration_ms = tracing::field::Empty,
            status = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let (outcome, status) = match &result {
                    Ok(response) => (response.kind.as_str(), response.status.as_u16()),
                    Err(_) => ("error", 500),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("status", status);
                span.record("outcome", outcome);

                ::metrics::counter!(
                    "seatline_dispatch_total",
                    "method" => method.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                ::metrics::histogram!("seatline_dispatch_duration_seconds", "method" => method)
                    .record(elapsed.as_secs_f64());

                tracing::info!(duration_ms, status, outcome, "request complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
