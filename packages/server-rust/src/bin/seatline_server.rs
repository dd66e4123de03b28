//! Seatline server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use seatline_server::service::domain::{build_route_table, tickets};
use seatline_server::service::{build_dispatch_pipeline, Dispatcher};
use seatline_server::storage::{open_engine, PersistenceBoundary};
use seatline_server::{Cli, LogFormat, NetworkModule, SeatlineConfig};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn install_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

async fn run(config: SeatlineConfig) -> anyhow::Result<()> {
    if let Some(port) = config.metrics_port {
        install_metrics(port)?;
    }

    let engine = open_engine(&config.datasource)?;
    info!(engine = engine.name(), datasource = %config.datasource, "storage opened");
    let boundary = Arc::new(PersistenceBoundary::new(engine));

    tickets::seed_hall(
        &boundary,
        &config.hall.default_hall_id,
        config.hall.rows,
        config.hall.cols,
    )
    .await?;

    let routes = build_route_table(&config).context("route registration failed")?;
    for (method, pattern) in routes.routes() {
        info!(%method, pattern, "route registered");
    }

    let dispatcher = Dispatcher::new(routes, Arc::clone(&boundary), &config.dispatch);
    let pipeline = build_dispatch_pipeline(dispatcher, &config.dispatch);

    let mut network = NetworkModule::new(config.network.clone(), pipeline, boundary);
    let port = network.start().await?;
    info!(port, "seatline server ready");

    network
        .serve(async {
            // A failing signal handler only means Ctrl-C can't stop us.
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config();
    init_tracing(config.log_format);
    run(config).await
}
