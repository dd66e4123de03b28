//! Reactive dispatcher: routes a request, runs its interception chain
//! around a unit of work, and turns every control path into a response.
//!
//! Per request:
//!
//! 1. resolve the route (404 on miss)
//! 2. run the chain; the innermost stage opens the unit of work for
//!    transactional routes, so a pre-phase short-circuit never begins one
//! 3. success outcome: commit; conflict: roll back, back off, rerun the chain
//!    from the top while retries remain
//! 4. failure outcome or fault: roll back
//!
//! Interceptor post-phases see a success before it is committed; the
//! settled outcome is recorded here, as `seatline_operation_settled_total`
//! and an `invocation settled` event, once the commit has decided it.
//!
//! Cancellation and the deadline are raced against every attempt and every
//! backoff. When either wins, the chain future is dropped, the unit of work
//! is rolled back and only cleanup-declaring interceptors run. A commit that
//! has started is allowed to finish.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::time::Instant;
use tower::Service;
use tracing::{debug, error, info_span, warn, Instrument};

use super::chain::InterceptorChain;
use super::config::DispatchConfig;
use super::context::InvocationContext;
use super::operation::{Handler, OperationError, Outcome, RequestState};
use super::request::{DispatchRequest, DispatchResponse};
use super::retry::RetryPolicy;
use super::router::RouteTable;
use crate::storage::PersistenceBoundary;

// ---------------------------------------------------------------------------
// Innermost stage
// ---------------------------------------------------------------------------

/// Opens the unit of work (transactional routes only) and calls the handler.
struct UnitOfWorkStage {
    handler: Arc<dyn Handler>,
    transactional: bool,
}

#[async_trait]
impl Handler for UnitOfWorkStage {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
        if self.transactional {
            ctx.open_unit().await?;
        }
        self.handler.call(ctx).await
    }
}

/// What ended one race between the chain and the interrupt sources.
enum Interrupt<T> {
    Done(T),
    Cancelled,
    DeadlineExceeded,
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn race<F: Future>(request: &DispatchRequest, fut: F) -> Interrupt<F::Output> {
    tokio::select! {
        biased;
        () = request.cancel.cancelled() => Interrupt::Cancelled,
        () = deadline_elapsed(request.deadline) => Interrupt::DeadlineExceeded,
        output = fut => Interrupt::Done(output),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct DispatcherInner {
    routes: Arc<RouteTable>,
    boundary: Arc<PersistenceBoundary>,
    retry: RetryPolicy,
}

/// Cheaply cloneable handle to the dispatch core.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        routes: RouteTable,
        boundary: Arc<PersistenceBoundary>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                routes: Arc::new(routes),
                boundary,
                retry: config.retry.clone(),
            }),
        }
    }

    #[must_use]
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.inner.routes
    }

    #[must_use]
    pub fn boundary(&self) -> &Arc<PersistenceBoundary> {
        &self.inner.boundary
    }

    /// Dispatches `request`. Always produces a well-formed response.
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse {
        let span = info_span!(
            "dispatch",
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: DispatchRequest) -> DispatchResponse {
        let Some(resolved) = self.inner.routes.resolve(&request.method, &request.path) else {
            debug!("no route");
            return DispatchResponse::from_outcome(
                request.id,
                Outcome::not_found(format!("no route for {} {}", request.method, request.path)),
                0,
            );
        };
        let handle = resolved.handle;

        let mut ctx = InvocationContext::new(
            request.id,
            request.method.clone(),
            request.path.clone(),
            handle.pattern().as_str().to_string(),
            request.headers.clone(),
            request.body.clone(),
            resolved.params,
            Arc::clone(&self.inner.boundary),
        );
        ctx.transition(RequestState::Routed);

        let stage = UnitOfWorkStage {
            handler: Arc::clone(handle.handler()),
            transactional: handle.is_transactional(),
        };
        let chain = handle.chain();
        let retry = &self.inner.retry;
        let mut retries = 0u32;

        let response = loop {
            ctx.transition(RequestState::Executing);
            let attempts = retries + 1;

            let result = match race(&request, chain.invoke(&mut ctx, &stage)).await {
                Interrupt::Done(result) => result,
                Interrupt::Cancelled => {
                    break Self::interrupted(&mut ctx, chain, &request, false, attempts).await;
                }
                Interrupt::DeadlineExceeded => {
                    break Self::interrupted(&mut ctx, chain, &request, true, attempts).await;
                }
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    ctx.transition(RequestState::Failed);
                    ctx.rollback_unit().await;
                    error!(error = %err, attempt = ctx.attempt(), "operation faulted");
                    break DispatchResponse::internal_error(request.id, attempts);
                }
            };

            ctx.transition(RequestState::Completed);
            if !outcome.is_success() {
                ctx.rollback_unit().await;
                break DispatchResponse::from_outcome(request.id, outcome, attempts);
            }

            if request.cancel.is_cancelled() {
                break Self::interrupted(&mut ctx, chain, &request, false, attempts).await;
            }

            match ctx.commit_unit().await {
                Ok(()) => break DispatchResponse::from_outcome(request.id, outcome, attempts),
                Err(err) if err.is_conflict() => {
                    ctx.rollback_unit().await;
                    if !retry.should_retry(retries) {
                        warn!(attempts, error = %err, "conflict retries exhausted");
                        break DispatchResponse::from_outcome(
                            request.id,
                            Outcome::PersistenceConflict { attempts },
                            attempts,
                        );
                    }
                    let delay = retry.delay_for_attempt(retries);
                    debug!(attempt = ctx.attempt(), ?delay, error = %err, "commit conflict, retrying");
                    retries += 1;
                    match race(&request, tokio::time::sleep(delay)).await {
                        Interrupt::Done(()) => {}
                        Interrupt::Cancelled => {
                            break Self::interrupted(&mut ctx, chain, &request, false, attempts)
                                .await;
                        }
                        Interrupt::DeadlineExceeded => {
                            break Self::interrupted(&mut ctx, chain, &request, true, attempts)
                                .await;
                        }
                    }
                    ctx.reset_for_retry();
                }
                Err(err) => {
                    ctx.rollback_unit().await;
                    error!(error = %err, "commit failed");
                    break DispatchResponse::internal_error(request.id, attempts);
                }
            }
        };

        ctx.transition(RequestState::Responded);
        Self::record_settled(handle.pattern().as_str(), &response);
        response
    }

    fn record_settled(route: &str, response: &DispatchResponse) {
        let outcome = response.kind.as_str();
        metrics::counter!(
            "seatline_operation_settled_total",
            "route" => route.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        debug!(
            route,
            outcome,
            status = response.status.as_u16(),
            attempts = response.attempts,
            "invocation settled"
        );
    }

    /// Cancellation or deadline: roll back, then run cleanup hooks only.
    async fn interrupted(
        ctx: &mut InvocationContext,
        chain: &InterceptorChain,
        request: &DispatchRequest,
        deadline: bool,
        attempts: u32,
    ) -> DispatchResponse {
        ctx.rollback_unit().await;
        chain.cancel(ctx).await;
        if deadline {
            warn!(attempts, "operation deadline exceeded");
            DispatchResponse::deadline_exceeded(request.id, attempts)
        } else {
            debug!(attempts, "request cancelled by client");
            DispatchResponse::cancelled(request.id, attempts)
        }
    }
}

impl Service<DispatchRequest> for Dispatcher {
    type Response = DispatchResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<DispatchResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: DispatchRequest) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.dispatch(request).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
