//! Periodic scheduling of collection, checks and delivery
//!
//! Four independent tasks run on their own intervals: metrics (followed by
//! a buffer flush), heartbeat, logs and service checks. Each tick spawns a
//! round without waiting for the previous one, so a slow round overlaps the
//! next instead of delaying it. Shared state touched by overlapping rounds
//! (the delivery buffer, log high-water marks) is last-write-wins.

use crate::collector::{Collector, DynLogCollector, DynMetricCollector};
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::probe::{ServiceProber, ServiceRegistry};
use crate::sync::DeliveryClient;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Configuration for the scheduled tasks
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Metric collection and buffer flush (default: 60 seconds)
    pub metrics_interval: Duration,
    /// Liveness signal (default: 30 seconds)
    pub heartbeat_interval: Duration,
    /// Log collection (default: 5 minutes)
    pub logs_interval: Duration,
    /// Service checks (default: 60 seconds)
    pub services_interval: Duration,
    /// Delay before the one-off startup pass (default: 2 seconds)
    pub warmup_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            metrics_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            logs_interval: Duration::from_secs(300),
            services_interval: Duration::from_secs(60),
            warmup_delay: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self, task: TaskKind) -> Duration {
        match task {
            TaskKind::Metrics => self.metrics_interval,
            TaskKind::Heartbeat => self.heartbeat_interval,
            TaskKind::Logs => self.logs_interval,
            TaskKind::Services => self.services_interval,
        }
    }
}

/// The scheduled tasks, in warm-up order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Metrics,
    Heartbeat,
    Logs,
    Services,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Metrics,
        TaskKind::Heartbeat,
        TaskKind::Logs,
        TaskKind::Services,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Metrics => "metrics",
            TaskKind::Heartbeat => "heartbeat",
            TaskKind::Logs => "logs",
            TaskKind::Services => "services",
        }
    }
}

/// Summary of one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub task: TaskKind,
    /// Records collected (samples, log lines or check results)
    pub records: usize,
    /// Whether the collector service accepted this round's payload
    pub delivered: bool,
    pub duration: Duration,
}

/// Everything one round needs: sources, checkers and the delivery client
pub struct Pipeline {
    metric_collectors: Vec<DynMetricCollector>,
    log_collectors: Vec<DynLogCollector>,
    prober: ServiceProber,
    services: ServiceRegistry,
    client: Arc<DeliveryClient>,
    health: Option<HealthRegistry>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    pub fn new(client: Arc<DeliveryClient>, prober: ServiceProber, services: ServiceRegistry) -> Self {
        Self {
            metric_collectors: Vec::new(),
            log_collectors: Vec::new(),
            prober,
            services,
            client,
            health: None,
            metrics: AgentMetrics::new(),
            logger: StructuredLogger::new("unknown"),
        }
    }

    pub fn with_metric_collector(mut self, collector: DynMetricCollector) -> Self {
        self.metric_collectors.push(collector);
        self
    }

    pub fn with_log_collector(mut self, collector: DynLogCollector) -> Self {
        self.log_collectors.push(collector);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn client(&self) -> &Arc<DeliveryClient> {
        &self.client
    }

    /// Run one round of a task, recording latency and logging the outcome
    pub async fn run(&self, task: TaskKind) -> RoundReport {
        let started = Instant::now();

        let (records, delivered) = match task {
            TaskKind::Metrics => self.collect_and_send().await,
            TaskKind::Heartbeat => (0, self.client.send_heartbeat().await.is_ok()),
            TaskKind::Logs => self.collect_and_send_logs().await,
            TaskKind::Services => self.check_and_send_services().await,
        };

        let duration = started.elapsed();
        self.metrics
            .observe_round_latency(task.as_str(), duration.as_secs_f64());
        self.logger.log_round_completed(
            task.as_str(),
            records,
            delivered,
            duration.as_millis() as u64,
        );

        RoundReport {
            task,
            records,
            delivered,
            duration,
        }
    }

    /// One round of every task, in order
    pub async fn warm_up(&self) -> Vec<RoundReport> {
        let mut reports = Vec::with_capacity(TaskKind::ALL.len());
        for task in TaskKind::ALL {
            reports.push(self.run(task).await);
        }
        reports
    }

    /// Collect host and container metrics, send them, then flush the buffer
    async fn collect_and_send(&self) -> (usize, bool) {
        let samples = collect_from(&self.metric_collectors).await;
        self.metrics.add_records_collected("metrics", samples.len());

        if let Some(health) = &self.health {
            if samples.is_empty() && !self.metric_collectors.is_empty() {
                health
                    .set_degraded(components::COLLECTOR, "No metric samples collected")
                    .await;
            } else {
                health.set_healthy(components::COLLECTOR).await;
            }
        }

        let delivered = if samples.is_empty() {
            false
        } else {
            self.client.send_metrics(&samples).await.is_ok()
        };

        self.client.flush().await;
        (samples.len(), delivered)
    }

    async fn collect_and_send_logs(&self) -> (usize, bool) {
        let logs = collect_from(&self.log_collectors).await;
        self.metrics.add_records_collected("logs", logs.len());

        if logs.is_empty() {
            debug!("No new log lines");
            return (0, false);
        }
        let delivered = self.client.send_logs(&logs).await.is_ok();
        (logs.len(), delivered)
    }

    /// Check every cached target; a no-op while the cache is empty
    async fn check_and_send_services(&self) -> (usize, bool) {
        let targets = self.services.list().await;
        if targets.is_empty() {
            debug!("No services configured to check");
            return (0, false);
        }

        let results = self.prober.check_all(&targets).await;
        self.metrics.add_records_collected("services", results.len());
        for result in &results {
            self.metrics.inc_services_checked(result.status.as_str());
        }
        if let Some(health) = &self.health {
            health.set_healthy(components::CHECKER).await;
        }

        let delivered = self.client.send_services(&results).await.is_ok();
        (results.len(), delivered)
    }
}

async fn collect_from<T: Send + 'static>(collectors: &[Arc<dyn Collector<Output = T>>]) -> Vec<T> {
    join_all(collectors.iter().map(|c| c.collect()))
        .await
        .into_iter()
        .flatten()
        .collect()
}

/// Drives a pipeline on independent timers
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, config: SchedulerConfig) -> Self {
        Self { pipeline, config }
    }

    /// Spawn the warm-up pass and one timer task per task kind
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            metrics_secs = self.config.metrics_interval.as_secs(),
            heartbeat_secs = self.config.heartbeat_interval.as_secs(),
            logs_secs = self.config.logs_interval.as_secs(),
            services_secs = self.config.services_interval.as_secs(),
            "Starting scheduler"
        );

        let tasks: Vec<JoinHandle<()>> = TaskKind::ALL
            .into_iter()
            .map(|task| {
                tokio::spawn(run_periodic(
                    Arc::clone(&self.pipeline),
                    task,
                    self.config.interval(task),
                    shutdown_tx.subscribe(),
                ))
            })
            .collect();

        let pipeline = Arc::clone(&self.pipeline);
        let warmup_delay = self.config.warmup_delay;
        let warmup = tokio::spawn(async move {
            tokio::time::sleep(warmup_delay).await;
            pipeline.warm_up().await;
        });

        SchedulerHandle {
            pipeline: self.pipeline,
            shutdown_tx,
            tasks,
            warmup,
        }
    }
}

async fn run_periodic(
    pipeline: Arc<Pipeline>,
    task: TaskKind,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rounds = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pipeline = Arc::clone(&pipeline);
                rounds.spawn(async move { pipeline.run(task).await });
            }
            Some(finished) = rounds.join_next(), if !rounds.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!(task = task.as_str(), error = %e, "Round panicked");
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!(task = task.as_str(), in_flight = rounds.len(), "Stopping task");
                break;
            }
        }
    }

    rounds.shutdown().await;
}

/// Handle to running scheduler tasks
pub struct SchedulerHandle {
    pipeline: Arc<Pipeline>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    warmup: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop every task, cancel in-flight rounds, then push metrics once more
    pub async fn shutdown(self) -> RoundReport {
        let _ = self.shutdown_tx.send(());
        self.warmup.abort();
        for task in self.tasks.into_iter().chain(std::iter::once(self.warmup)) {
            match task.await {
                Err(e) if e.is_panic() => error!(error = %e, "Scheduler task panicked"),
                _ => {}
            }
        }

        info!("Scheduler stopped, sending final metrics");
        self.pipeline.run(TaskKind::Metrics).await
    }
}
