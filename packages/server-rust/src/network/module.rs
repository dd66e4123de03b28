//! Network module with deferred startup lifecycle.
//!
//! `new()` wires the router state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until shutdown. Storage seeding and route
//! registration happen before `new()`, so the server never reports ready
//! with a half-built dispatch stack.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    dispatch_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::DispatchPipeline;
use crate::storage::PersistenceBoundary;

/// Owns the HTTP server lifecycle.
///
/// 1. `new()` -- allocates the shutdown controller and router state
/// 2. `start()` -- binds the listener
/// 3. `serve()` -- accepts connections until shutdown, then drains
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    pipeline: DispatchPipeline,
    boundary: Arc<PersistenceBoundary>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        pipeline: DispatchPipeline,
        boundary: Arc<PersistenceBoundary>,
    ) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            pipeline,
            boundary,
        }
    }

    /// Shared shutdown controller, for callers that trigger or observe shutdown.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    /// - anything else -- the dispatch pipeline
    pub fn build_router(&self) -> Router {
        let state = AppState {
            pipeline: self.pipeline.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            boundary: Arc::clone(&self.boundary),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .fallback(dispatch_handler)
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener and returns the bound port.
    ///
    /// The port differs from the configured one when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves or the controller is triggered.
    ///
    /// On shutdown the health state moves to Draining, the listener stops
    /// accepting, and in-flight dispatches get `drain_timeout` to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server
    /// hits a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);

        let signal = {
            let controller = Arc::clone(&controller);
            let token = controller.shutdown_token();
            async move {
                tokio::select! {
                    () = shutdown => {}
                    () = token.cancelled() => {}
                }
                controller.trigger_shutdown();
                info!("shutdown signal received, draining");
            }
        };

        controller.set_ready();

        if let Some(ref tls) = self.config.tls {
            serve_tls(listener, router, tls, signal).await?;
        } else {
            info!("Serving plain HTTP connections");
            axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await?;
        }

        drain(&controller, &self.config).await;
        Ok(())
    }
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        signal.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

async fn drain(controller: &ShutdownController, config: &NetworkConfig) {
    // No-op if the signal future already did it.
    controller.trigger_shutdown();

    let outstanding = controller.in_flight_count();
    if outstanding > 0 {
        info!(outstanding, "waiting for in-flight dispatches");
    }
    if controller.wait_for_drain(config.drain_timeout).await {
        info!("all in-flight dispatches drained");
    } else {
        warn!(
            remaining = controller.in_flight_count(),
            "drain timeout expired with dispatches still running"
        );
    }
}
