//! Per-container CPU and memory usage from the runtime's stats API

use super::docker::{DockerClient, DockerContainer};
use super::Collector;
use crate::models::{ContainerSummary, MetricSample, Metadata};
use crate::observability::AgentMetrics;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Inventory plus usage samples from one round
#[derive(Debug, Clone, Default)]
pub struct ContainerReport {
    /// Every container the runtime knows about, running or not
    pub containers: Vec<ContainerSummary>,
    /// `docker_cpu` and `docker_memory` samples for running containers
    pub metrics: Vec<MetricSample>,
}

/// Collects usage for every running container
pub struct ContainerMetricsCollector {
    docker: Arc<DockerClient>,
    metrics: Option<AgentMetrics>,
}

impl ContainerMetricsCollector {
    pub fn new(docker: Arc<DockerClient>) -> Self {
        Self {
            docker,
            metrics: None,
        }
    }

    /// Report the inventory size to Prometheus after each round
    pub fn with_metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// List all containers and sample the running ones concurrently
    pub async fn collect_report(&self) -> ContainerReport {
        if !self.docker.is_available().await {
            debug!(
                socket = %self.docker.socket_path().display(),
                "Container runtime socket not found, skipping container metrics"
            );
            return ContainerReport::default();
        }

        let containers = match self.docker.list_containers(true).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Failed to list containers");
                return ContainerReport::default();
            }
        };

        let running: Vec<&DockerContainer> = containers.iter().filter(|c| c.is_running()).collect();
        let sampled = join_all(running.iter().map(|c| self.sample_container(c))).await;

        if let Some(metrics) = &self.metrics {
            metrics.set_containers_seen(containers.len() as i64);
        }

        ContainerReport {
            containers: containers.iter().map(summarize).collect(),
            metrics: sampled.into_iter().flatten().collect(),
        }
    }

    async fn sample_container(&self, container: &DockerContainer) -> Vec<MetricSample> {
        let stats = match self.docker.container_stats(&container.id).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(
                    container_id = %container.short_id(),
                    error = %e,
                    "Failed to read container stats"
                );
                return Vec::new();
            }
        };

        let mut identity = Metadata::new();
        identity.insert("containerId".into(), Value::from(container.id.as_str()));
        identity.insert("containerName".into(), Value::from(container.clean_name()));

        let mut memory_meta = identity.clone();
        memory_meta.insert("usage".into(), Value::from(stats.memory_usage()));
        memory_meta.insert("limit".into(), Value::from(stats.memory_limit()));

        vec![
            MetricSample::new("docker_cpu", stats.cpu_percent(), identity),
            MetricSample::new("docker_memory", stats.memory_percent(), memory_meta),
        ]
    }
}

fn summarize(container: &DockerContainer) -> ContainerSummary {
    ContainerSummary {
        container_id: container.id.clone(),
        container_name: container.clean_name().to_string(),
        image: container.image.clone(),
        status: container.state.clone(),
        created: container.created,
    }
}

#[async_trait]
impl Collector for ContainerMetricsCollector {
    type Output = MetricSample;

    fn name(&self) -> &'static str {
        "container_metrics"
    }

    async fn collect(&self) -> Vec<MetricSample> {
        self.collect_report().await.metrics
    }
}
