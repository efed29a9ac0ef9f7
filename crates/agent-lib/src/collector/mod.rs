//! Telemetry collection from the host and the local container runtime
//!
//! Each collector produces a batch per round and never fails the round:
//! unavailable sources are logged and yield an empty batch. Container
//! collectors talk to the runtime over its Unix control socket; host
//! collectors read system counters and the journal.

mod container_logs;
mod container_metrics;
pub mod docker;
pub mod frame;
mod host_logs;
mod host_metrics;

#[cfg(test)]
mod tests;

pub use container_logs::{ContainerLogCollector, ContainerLogConfig};
pub use container_metrics::{ContainerMetricsCollector, ContainerReport};
pub use docker::{DockerClient, DockerContainer, DockerStats};
pub use frame::{
    infer_level, parse_log_stream, split_timestamp, Frame, FrameIter, ParsedLogs, StreamType,
};
pub use host_logs::{
    journal_priority_level, parse_journal_line, parse_syslog_line, tail_lines, HostLogCollector,
    HostLogConfig,
};
pub use host_metrics::HostMetricsCollector;

pub use async_trait::async_trait;

use crate::models::{LogRecord, MetricSample};
use std::sync::Arc;

/// A source of telemetry records
#[async_trait]
pub trait Collector: Send + Sync {
    /// Record type produced
    type Output: Send;

    /// Short name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Collect one batch; an unavailable source yields an empty batch
    async fn collect(&self) -> Vec<Self::Output>;
}

/// Shared handle to a metric collector
pub type DynMetricCollector = Arc<dyn Collector<Output = MetricSample>>;

/// Shared handle to a log collector
pub type DynLogCollector = Arc<dyn Collector<Output = LogRecord>>;
