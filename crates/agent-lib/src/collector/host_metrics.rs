//! Host-level CPU, memory, filesystem and network sampling

use super::Collector;
use crate::models::{MetricSample, Metadata};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Disks, Networks, System};
use tracing::warn;

/// Sampler state kept between rounds so CPU and network deltas make sense
struct HostState {
    system: System,
    disks: Disks,
    networks: Networks,
    /// Unset until the first round, which reports zero rates
    last_network_refresh: Option<Instant>,
}

/// Collects `cpu`, `memory`, `disk`, `network_rx` and `network_tx` samples
pub struct HostMetricsCollector {
    state: Arc<Mutex<HostState>>,
}

impl HostMetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime the CPU counters; the first real sample is a delta from here
        system.refresh_cpu();
        system.refresh_memory();

        Self {
            state: Arc::new(Mutex::new(HostState {
                system,
                disks: Disks::new_with_refreshed_list(),
                networks: Networks::new_with_refreshed_list(),
                last_network_refresh: None,
            })),
        }
    }
}

fn sample(state: &Mutex<HostState>) -> Vec<MetricSample> {
    let mut state = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Host sampler state was poisoned, reusing it");
            poisoned.into_inner()
        }
    };

    let mut samples = vec![
        cpu_sample(&mut state.system),
        memory_sample(&mut state.system),
    ];
    samples.extend(disk_samples(&mut state.disks));
    samples.extend(network_samples(&mut state));
    samples
}

impl Default for HostMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for HostMetricsCollector {
    type Output = MetricSample;

    fn name(&self) -> &'static str {
        "host_metrics"
    }

    async fn collect(&self) -> Vec<MetricSample> {
        // sysinfo reads procfs synchronously; keep it off the reactor
        let state = Arc::clone(&self.state);
        match tokio::task::spawn_blocking(move || sample(&state)).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "Host metrics sampling task failed");
                Vec::new()
            }
        }
    }
}

fn cpu_sample(system: &mut System) -> MetricSample {
    system.refresh_cpu();
    let cores: Vec<Value> = system
        .cpus()
        .iter()
        .map(|cpu| Value::from(cpu.cpu_usage() as f64))
        .collect();
    let load = System::load_average();

    MetricSample::new(
        "cpu",
        system.global_cpu_info().cpu_usage() as f64,
        to_metadata(json!({
            "cores": cores,
            "avgLoad": load.one,
        })),
    )
}

fn memory_sample(system: &mut System) -> MetricSample {
    system.refresh_memory();
    let total = system.total_memory();
    let used = system.used_memory();

    MetricSample::new(
        "memory",
        percent(used, total),
        to_metadata(json!({
            "total": total,
            "used": used,
            "free": system.free_memory(),
            "available": system.available_memory(),
        })),
    )
}

fn disk_samples(disks: &mut Disks) -> Vec<MetricSample> {
    disks.refresh_list();

    disks
        .list()
        .iter()
        .filter(|disk| disk.total_space() > 0)
        .map(|disk| {
            let size = disk.total_space();
            let available = disk.available_space();
            let used = size.saturating_sub(available);

            MetricSample::new(
                "disk",
                percent(used, size),
                to_metadata(json!({
                    "mount": disk.mount_point().to_string_lossy(),
                    "fs": disk.name().to_string_lossy(),
                    "type": disk.file_system().to_string_lossy(),
                    "size": size,
                    "used": used,
                    "available": available,
                })),
            )
        })
        .collect()
}

fn network_samples(state: &mut HostState) -> Vec<MetricSample> {
    state.networks.refresh();
    let elapsed = state
        .last_network_refresh
        .map_or(0.0, |at| at.elapsed().as_secs_f64());
    state.last_network_refresh = Some(Instant::now());

    let mut samples = Vec::new();
    for (name, data) in state.networks.iter() {
        let rx = rate(data.received(), elapsed);
        let tx = rate(data.transmitted(), elapsed);
        let metadata = to_metadata(json!({ "interface": name }));

        samples.push(MetricSample::new("network_rx", rx, metadata.clone()));
        samples.push(MetricSample::new("network_tx", tx, metadata));
    }
    samples
}

/// `part / whole` as a percentage, 0 when `whole` is 0
pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Bytes per second over `elapsed` seconds
pub(crate) fn rate(bytes: u64, elapsed: f64) -> f64 {
    if elapsed > 0.0 {
        bytes as f64 / elapsed
    } else {
        0.0
    }
}

fn to_metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}
