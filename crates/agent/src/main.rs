//! Monitor Agent - host and container telemetry agent
//!
//! Runs on each monitored server, collecting host and container metrics,
//! logs and service health, and delivering them to the collector service.

use agent_lib::{
    collector::{
        ContainerLogCollector, ContainerLogConfig, ContainerMetricsCollector, DockerClient,
        HostLogCollector, HostMetricsCollector,
    },
    health::HealthRegistry,
    observability::{AgentMetrics, StructuredLogger},
    probe::{ServiceProber, ServiceRegistry},
    scheduler::{Pipeline, Scheduler},
    sync::DeliveryClientBuilder,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting monitor-agent");

    let config = match config::AgentConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    info!(
        node_name = %config.node_name,
        backend_url = %config.backend_url,
        "Agent configured"
    );

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        warn!(
            path = %config.data_dir.display(),
            error = %e,
            "Failed to create data directory"
        );
    }

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let client = Arc::new(
        DeliveryClientBuilder::new()
            .base_url(&config.backend_url)
            .api_key(&config.api_key)
            .request_timeout(config.request_timeout())
            .buffer_config(config.buffer_config())
            .health(health_registry.clone())
            .logger(logger.clone())
            .build()
            .context("Failed to create delivery client")?,
    );

    let services = ServiceRegistry::new();
    if let Some(path) = &config.services_file {
        if let Err(e) = services.load_file(path).await {
            warn!(error = %e, "Failed to load service targets");
        }
    }

    let docker = Arc::new(DockerClient::new(config.docker_socket.clone()));
    let pipeline = Pipeline::new(
        Arc::clone(&client),
        ServiceProber::new().context("Failed to create service prober")?,
        services,
    )
    .with_metric_collector(Arc::new(HostMetricsCollector::new()))
    .with_metric_collector(Arc::new(
        ContainerMetricsCollector::new(Arc::clone(&docker)).with_metrics(metrics.clone()),
    ))
    .with_log_collector(Arc::new(HostLogCollector::default()))
    .with_log_collector(Arc::new(ContainerLogCollector::new(
        docker,
        ContainerLogConfig::default(),
    )))
    .with_health(health_registry.clone())
    .with_logger(logger.clone());

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::clone(&client),
    ));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    let handle = Scheduler::new(Arc::new(pipeline), config.scheduler_config()).start();

    health_registry.set_ready(true).await;
    logger.log_startup(AGENT_VERSION, client.base_url(), client.buffered_len().await);

    let reason = wait_for_signal().await?;
    health_registry.set_ready(false).await;
    info!(reason, "Shutting down");

    let report = handle.shutdown().await;
    if !report.delivered {
        warn!(buffered = client.buffered_len().await, "Final metrics not delivered");
    }
    logger.log_shutdown(reason);

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() -> Result<&'static str> {
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
