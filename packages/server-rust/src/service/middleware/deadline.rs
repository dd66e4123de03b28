//! Deadline middleware for dispatch requests.
//!
//! Stamps an absolute deadline on requests that arrive without one. The
//! dispatcher races every attempt against it and answers 504 when it passes;
//! the in-flight future is never dropped from outside, so a commit that has
//! started always finishes.

use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tower::{Layer, Service};

use crate::service::request::DispatchRequest;

// ---------------------------------------------------------------------------
// DeadlineLayer
// ---------------------------------------------------------------------------

/// Tower layer that assigns `now + timeout` as the request deadline.
#[derive(Debug, Clone)]
pub struct DeadlineLayer {
    timeout: Option<Duration>,
}

impl DeadlineLayer {
    /// `None` leaves requests without a deadline.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// DeadlineService
// ---------------------------------------------------------------------------

/// Service wrapper that stamps per-request deadlines.
#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    timeout: Option<Duration>,
}

impl<S> Service<DispatchRequest> for DeadlineService<S>
where
    S: Service<DispatchRequest>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: DispatchRequest) -> Self::Future {
        if request.deadline.is_none() {
            if let Some(timeout) = self.timeout {
                request.deadline = Some(Instant::now() + timeout);
            }
        }
        self.inner.call(request)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
