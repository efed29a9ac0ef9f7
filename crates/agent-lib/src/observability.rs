//! Observability infrastructure for the monitor agent
//!
//! Provides:
//! - Prometheus metrics (round latency, record counts, delivery failures, buffer depth)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for round latency (in seconds)
///
/// Rounds include network calls with a 10 s timeout, hence the long tail.
const ROUND_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    round_latency_seconds: HistogramVec,
    records_collected: IntCounterVec,
    delivery_failures: IntCounterVec,
    buffer_items: IntGauge,
    containers_seen: IntGauge,
    services_checked: IntCounterVec,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            round_latency_seconds: register_histogram_vec!(
                "monitor_agent_round_latency_seconds",
                "Duration of one scheduled round, collection plus delivery",
                &["task"],
                ROUND_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register round_latency_seconds"),

            records_collected: register_int_counter_vec!(
                "monitor_agent_records_collected_total",
                "Records produced by collectors and checkers",
                &["kind"]
            )
            .expect("Failed to register records_collected_total"),

            delivery_failures: register_int_counter_vec!(
                "monitor_agent_delivery_failures_total",
                "Failed deliveries to the collector service",
                &["kind"]
            )
            .expect("Failed to register delivery_failures_total"),

            buffer_items: register_int_gauge!(
                "monitor_agent_buffer_items",
                "Payloads waiting in the local delivery buffer"
            )
            .expect("Failed to register buffer_items"),

            containers_seen: register_int_gauge!(
                "monitor_agent_containers_seen",
                "Containers reported by the runtime in the last round"
            )
            .expect("Failed to register containers_seen"),

            services_checked: register_int_counter_vec!(
                "monitor_agent_services_checked_total",
                "Service checks performed, by outcome",
                &["status"]
            )
            .expect("Failed to register services_checked_total"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMetrics").finish_non_exhaustive()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    /// Record how long a scheduled round took
    pub fn observe_round_latency(&self, task: &str, duration_secs: f64) {
        self.inner()
            .round_latency_seconds
            .with_label_values(&[task])
            .observe(duration_secs);
    }

    /// Count records produced for a payload kind
    pub fn add_records_collected(&self, kind: &str, count: usize) {
        self.inner()
            .records_collected
            .with_label_values(&[kind])
            .inc_by(count as u64);
    }

    pub fn inc_delivery_failures(&self, kind: &str) {
        self.inner()
            .delivery_failures
            .with_label_values(&[kind])
            .inc();
    }

    pub fn set_buffer_items(&self, items: i64) {
        self.inner().buffer_items.set(items);
    }

    pub fn set_containers_seen(&self, count: i64) {
        self.inner().containers_seen.set(count);
    }

    /// Count one service check outcome (`up`, `degraded`, `down`)
    pub fn inc_services_checked(&self, status: &str) {
        self.inner()
            .services_checked
            .with_label_values(&[status])
            .inc();
    }
}

/// Structured logger for agent events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, backend_url: &str, buffered_items: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            backend_url = %backend_url,
            buffered_items = buffered_items,
            "Monitor agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Monitor agent shutting down"
        );
    }

    /// Log a delivery that failed; `buffered` says whether the payload was kept
    pub fn log_delivery_failed(&self, kind: &str, error: &str, buffered: bool) {
        warn!(
            event = "delivery_failed",
            node = %self.node_name,
            kind = %kind,
            error = %error,
            buffered = buffered,
            "Delivery to collector service failed"
        );
    }

    /// Log a buffer flush pass that did some work
    pub fn log_buffer_flushed(&self, delivered: usize, remaining: usize) {
        info!(
            event = "buffer_flushed",
            node = %self.node_name,
            delivered = delivered,
            remaining = remaining,
            "Flushed buffered payloads"
        );
    }

    /// Log the end of a scheduled round
    pub fn log_round_completed(&self, task: &str, records: usize, delivered: bool, duration_ms: u64) {
        info!(
            event = "round_completed",
            node = %self.node_name,
            task = %task,
            records = records,
            delivered = delivered,
            duration_ms = duration_ms,
            "Round completed"
        );
    }
}
