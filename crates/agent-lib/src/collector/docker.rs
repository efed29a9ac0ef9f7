//! Minimal container runtime client over the local control socket
//!
//! Speaks plain HTTP/1.0 so responses are never chunked: the body is
//! everything after the header block, read until the runtime closes the
//! connection. Only the read-only queries the collectors need are exposed.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Default runtime socket location
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Entry of `GET /containers/json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DockerContainer {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub created: i64,
}

impl DockerContainer {
    /// Name without the runtime's leading `/`
    pub fn clean_name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or_else(|| self.short_id())
    }

    /// First 12 characters of the id
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// One-shot stats snapshot from `GET /containers/{id}/stats?stream=false`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerStats {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl DockerStats {
    /// Container CPU share of the host since the previous sample, in percent
    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self.cpu_stats.cpu_usage.total_usage as f64
            - self.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = self.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - self.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;

        if system_delta > 0.0 {
            cpu_delta / system_delta * 100.0
        } else {
            0.0
        }
    }

    /// Memory usage relative to the limit, in percent
    ///
    /// A missing or zero limit is treated as 1 byte.
    pub fn memory_percent(&self) -> f64 {
        let usage = self.memory_usage() as f64;
        let limit = self.memory_limit().max(1) as f64;
        usage / limit * 100.0
    }

    pub fn memory_usage(&self) -> u64 {
        self.memory_stats.usage.unwrap_or(0)
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory_stats.limit.unwrap_or(1)
    }
}

/// Read-only client for the runtime's HTTP API on a Unix socket
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DockerClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether the control socket exists
    pub async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.socket_path).await.is_ok()
    }

    /// List containers; `all` includes stopped ones
    pub async fn list_containers(&self, all: bool) -> Result<Vec<DockerContainer>> {
        let path = format!("/containers/json?all={}", if all { 1 } else { 0 });
        let body = self.get(&path).await?;
        serde_json::from_slice(&body).context("Failed to parse container list")
    }

    /// Fetch a single stats snapshot
    pub async fn container_stats(&self, id: &str) -> Result<DockerStats> {
        let path = format!("/containers/{}/stats?stream=false", id);
        let body = self.get(&path).await?;
        serde_json::from_slice(&body)
            .with_context(|| format!("Failed to parse stats for container {}", id))
    }

    /// Fetch raw multiplexed log bytes written since `since` (Unix seconds)
    pub async fn container_logs(&self, id: &str, since: i64, tail: usize) -> Result<Vec<u8>> {
        let path = format!(
            "/containers/{}/logs?stdout=1&stderr=1&timestamps=1&since={}&tail={}",
            id, since, tail
        );
        self.get(&path).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        tokio::time::timeout(self.timeout, self.request(path))
            .await
            .with_context(|| format!("Runtime request timed out: {}", path))?
    }

    async fn request(&self, path: &str) -> Result<Vec<u8>> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!("Failed to connect to {}", self.socket_path.display())
            })?;

        let request = format!("GET {} HTTP/1.0\r\nHost: localhost\r\n\r\n", path);
        stream
            .write_all(request.as_bytes())
            .await
            .context("Failed to write request")?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .context("Failed to read response")?;

        debug!(path = %path, bytes = response.len(), "Runtime response received");
        split_response(response)
    }
}

/// Separate the body from an HTTP/1.x response, rejecting non-2xx statuses
fn split_response(response: Vec<u8>) -> Result<Vec<u8>> {
    let header_end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .context("Invalid HTTP response from runtime")?;

    let head = String::from_utf8_lossy(&response[..header_end]);
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .context("Missing status code in runtime response")?;

    let body = response[header_end + 4..].to_vec();
    if !(200..300).contains(&status) {
        bail!(
            "Runtime returned status {}: {}",
            status,
            String::from_utf8_lossy(&body).trim()
        );
    }

    Ok(body)
}
