//! Metrics exporter - host and container metrics for Prometheus
//!
//! Samples host counters every tick and Docker container stats on a
//! slower cadence, and serves them on `/metrics`.

use anyhow::{Context, Result};
use exporter_lib::{
    health::{components, HealthRegistry},
    observability::{ExporterMetrics, StructuredLogger},
    scheduler::SchedulerBuilder,
    sink::PrometheusSink,
    sources::{ContainerRuntime, DockerClient, ProcfsHost},
};
use metrics_exporter::{api, config::ExporterConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metrics-exporter");

    let config = ExporterConfig::load()?;
    info!(
        metrics_port = config.metrics_port,
        collection_interval = config.collection_interval,
        docker_collection_interval = config.docker_collection_interval,
        docker_enabled = config.docker_enabled,
        "Exporter configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::HOST).await;
    health_registry.register(components::PROCESSES).await;
    if config.docker_enabled {
        health_registry.register(components::COMPOSE).await;
        health_registry.register(components::CONTAINERS).await;
    }

    let metrics = ExporterMetrics::new().context("Failed to register exporter metrics")?;
    let sink = Arc::new(PrometheusSink::new().context("Failed to register gauge families")?);

    let logger = StructuredLogger::new(&config.hostname);
    logger.log_startup(EXPORTER_VERSION, config.metrics_port, config.docker_enabled);

    let host = ProcfsHost::new(config.procfs_root());
    info!(procfs_root = %host.root().display(), "Reading host counters");

    let mut builder = SchedulerBuilder::new()
        .host(Box::new(host))
        .sink(sink.clone())
        .config(config.scheduler())
        .project_filter(config.compose_project_filter.clone())
        .metrics(metrics.clone())
        .health(health_registry.clone());

    if config.docker_enabled {
        let docker = DockerClient::new(&config.docker_socket).with_timeout(config.docker_timeout());
        match docker.ping().await {
            Ok(()) => {
                metrics.set_runtime_up(true);
                logger.log_runtime_status(&config.docker_socket, true, None);
            }
            Err(e) => {
                metrics.set_runtime_up(false);
                logger.log_runtime_status(&config.docker_socket, false, Some(&e.to_string()));
            }
        }
        builder = builder.runtime(Arc::new(docker));
    }

    let scheduler = builder.build().context("Failed to build scheduler")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        sink.clone(),
    ));
    let mut api_shutdown = shutdown_tx.subscribe();
    let port = config.metrics_port;
    let api_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = api_shutdown.recv().await;
        };
        if let Err(e) = api::serve(port, app_state, shutdown).await {
            error!(error = %e, "Metrics server failed");
        }
    });

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let reason = wait_for_signal().await?;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    if let Err(e) = api_handle.await {
        warn!(error = %e, "Metrics server task ended abnormally");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            Ok("SIGINT received")
        }
        _ = terminate.recv() => Ok("SIGTERM received"),
    }
}
