//! Container log collection through the runtime's logs endpoint

use super::docker::{DockerClient, DockerContainer};
use super::frame::parse_log_stream;
use super::Collector;
use crate::models::LogRecord;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for container log collection
#[derive(Debug, Clone)]
pub struct ContainerLogConfig {
    /// Maximum lines fetched per container per round
    pub max_lines_per_container: usize,
    /// How far back the first fetch for a container reaches
    pub initial_lookback: Duration,
}

impl Default for ContainerLogConfig {
    fn default() -> Self {
        Self {
            max_lines_per_container: 50,
            initial_lookback: Duration::from_secs(5 * 60),
        }
    }
}

/// Fetches new log lines from every running container
///
/// Tracks a per-container high-water mark (Unix seconds). The runtime's
/// `since` filter is inclusive at one-second resolution, so the newest
/// second may be delivered twice.
pub struct ContainerLogCollector {
    docker: Arc<DockerClient>,
    config: ContainerLogConfig,
    last_seen: DashMap<String, i64>,
}

impl ContainerLogCollector {
    pub fn new(docker: Arc<DockerClient>, config: ContainerLogConfig) -> Self {
        Self {
            docker,
            config,
            last_seen: DashMap::new(),
        }
    }

    /// High-water mark for a container, keyed by short id
    pub fn last_seen(&self, short_id: &str) -> Option<i64> {
        self.last_seen.get(short_id).map(|v| *v)
    }

    /// Forget all high-water marks
    pub fn reset(&self) {
        self.last_seen.clear();
    }

    async fn collect_container(&self, container: &DockerContainer) -> Vec<LogRecord> {
        let short_id = container.short_id();
        let now = Utc::now();
        let since = self.last_seen(short_id).unwrap_or_else(|| {
            now.timestamp() - self.config.initial_lookback.as_secs() as i64
        });

        let bytes = match self
            .docker
            .container_logs(&container.id, since, self.config.max_lines_per_container)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    container = %container.clean_name(),
                    error = %e,
                    "Failed to collect container logs"
                );
                return Vec::new();
            }
        };

        let parsed = parse_log_stream(&bytes, short_id, container.clean_name(), now);
        if let Some(latest) = parsed.latest {
            self.last_seen.insert(short_id.to_string(), latest.timestamp());
        }

        debug!(
            container = %container.clean_name(),
            records = parsed.records.len(),
            since,
            "Collected container logs"
        );
        parsed.records
    }
}

#[async_trait]
impl Collector for ContainerLogCollector {
    type Output = LogRecord;

    fn name(&self) -> &'static str {
        "container_logs"
    }

    async fn collect(&self) -> Vec<LogRecord> {
        if !self.docker.is_available().await {
            return Vec::new();
        }

        let containers = match self.docker.list_containers(false).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Failed to list containers for log collection");
                return Vec::new();
            }
        };

        let running = containers.iter().filter(|c| c.is_running());
        join_all(running.map(|c| self.collect_container(c)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
