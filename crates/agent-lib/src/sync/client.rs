//! HTTP delivery to the collector service
//!
//! Every payload kind except the heartbeat is buffered when delivery fails
//! and re-sent on a later flush. A successful send is followed by an
//! opportunistic flush, so the backlog drains as soon as the service is
//! reachable again.

use super::buffer::{BufferConfig, BufferStats, BufferedItem, DeliveryBuffer, PayloadKind};
use crate::health::{components, HealthRegistry};
use crate::models::{CheckResult, LogRecord, MetricSample};
use crate::observability::{AgentMetrics, StructuredLogger};
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error};
use url::Url;

/// Header carrying the agent's API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Heartbeat path on the collector service
pub const HEARTBEAT_PATH: &str = "/api/agent/heartbeat";

/// Acknowledgement returned by the collector service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Ack {
    pub success: bool,
    pub message: Option<String>,
    pub server_id: Option<i64>,
}

/// Why a delivery failed
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("collector service returned {status} for {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },
}

/// Result of one flush pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Entries accepted by the collector service
    pub delivered: usize,
    /// Entries still buffered after the pass
    pub remaining: usize,
    /// Another flush was already running, nothing was attempted
    pub skipped: bool,
}

/// Configuration for the delivery client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Collector service base URL (e.g. "http://localhost:3000")
    pub base_url: String,
    pub api_key: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    pub buffer: BufferConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(10),
            buffer: BufferConfig::default(),
        }
    }
}

/// Sends telemetry to the collector service, buffering what fails
pub struct DeliveryClient {
    http: Client,
    base_url: String,
    api_key: String,
    buffer: Mutex<DeliveryBuffer>,
    flushing: AtomicBool,
    health: Option<HealthRegistry>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

/// Clears the in-progress flag when a flush pass ends
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DeliveryClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send host and container metric samples
    pub async fn send_metrics(&self, metrics: &[MetricSample]) -> Result<Ack, DeliveryError> {
        self.send(PayloadKind::Metrics, json!({ "metrics": metrics })).await
    }

    /// Send service check results
    pub async fn send_services(&self, services: &[CheckResult]) -> Result<Ack, DeliveryError> {
        self.send(PayloadKind::Services, json!({ "services": services }))
            .await
    }

    /// Send log records
    pub async fn send_logs(&self, logs: &[LogRecord]) -> Result<Ack, DeliveryError> {
        self.send(PayloadKind::Logs, json!({ "logs": logs })).await
    }

    /// Send a liveness signal; a failed heartbeat is not buffered
    pub async fn send_heartbeat(&self) -> Result<Ack, DeliveryError> {
        match self.post(HEARTBEAT_PATH, &json!({})).await {
            Ok(ack) => {
                self.mark_delivered().await;
                self.flush().await;
                Ok(ack)
            }
            Err(e) => {
                self.metrics.inc_delivery_failures("heartbeat");
                self.logger
                    .log_delivery_failed("heartbeat", &e.to_string(), false);
                self.mark_failed(&e).await;
                Err(e)
            }
        }
    }

    /// Send one payload, buffering it on failure and flushing on success
    pub async fn send(&self, kind: PayloadKind, payload: Value) -> Result<Ack, DeliveryError> {
        match self.post(kind.path(), &payload).await {
            Ok(ack) => {
                self.mark_delivered().await;
                self.flush().await;
                Ok(ack)
            }
            Err(e) => {
                self.buffer_failed(kind, payload, &e).await;
                Err(e)
            }
        }
    }

    /// Re-send every buffered payload once
    ///
    /// Works on a snapshot: entries stay buffered (and on disk) until the
    /// collector service accepts them, and failed entries keep their
    /// original enqueue time. Does no I/O when the buffer is empty, and
    /// returns immediately if another flush is running.
    pub async fn flush(&self) -> FlushOutcome {
        if self.flushing.swap(true, Ordering::AcqRel) {
            debug!("Flush already in progress, skipping");
            return FlushOutcome {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = FlushGuard(&self.flushing);

        let snapshot = {
            let buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return FlushOutcome::default();
            }
            buffer.snapshot()
        };

        let mut delivered = Vec::new();
        for item in snapshot {
            match self.post(item.kind.path(), &item.payload).await {
                Ok(_) => delivered.push(item),
                Err(e) => {
                    debug!(kind = item.kind.as_str(), error = %e, "Buffered payload still undeliverable");
                    self.metrics.inc_delivery_failures(item.kind.as_str());
                }
            }
        }

        let remaining = {
            let mut buffer = self.buffer.lock().await;
            for item in &delivered {
                buffer.remove(item);
            }
            self.persist(&mut buffer).await;
            buffer.len()
        };

        if !delivered.is_empty() {
            self.logger.log_buffer_flushed(delivered.len(), remaining);
        }

        FlushOutcome {
            delivered: delivered.len(),
            remaining,
            skipped: false,
        }
    }

    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn buffer_stats(&self) -> BufferStats {
        self.buffer.lock().await.stats()
    }

    /// Snapshot of the buffered entries, oldest first
    pub async fn buffered_items(&self) -> Vec<BufferedItem> {
        self.buffer.lock().await.snapshot()
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Ack, DeliveryError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .post(url.as_str())
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| DeliveryError::Transport {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        // The payload was accepted even if the acknowledgement is unreadable
        let ack = match response.json::<Ack>().await {
            Ok(ack) => ack,
            Err(e) => {
                debug!(path = %path, error = %e, "Unreadable acknowledgement");
                Ack::default()
            }
        };
        Ok(ack)
    }

    async fn buffer_failed(&self, kind: PayloadKind, payload: Value, e: &DeliveryError) {
        self.metrics.inc_delivery_failures(kind.as_str());
        self.logger
            .log_delivery_failed(kind.as_str(), &e.to_string(), true);
        self.mark_failed(e).await;

        let mut buffer = self.buffer.lock().await;
        buffer.push(BufferedItem::new(kind, payload, Utc::now()));
        self.persist(&mut buffer).await;
    }

    /// Evict and write the buffer; a write failure only degrades health
    async fn persist(&self, buffer: &mut DeliveryBuffer) {
        let result = buffer.persist();
        self.metrics.set_buffer_items(buffer.len() as i64);

        match result {
            Ok(()) => {
                if let Some(health) = &self.health {
                    health.set_healthy(components::BUFFER).await;
                }
            }
            Err(e) => {
                error!(error = %e, entries = buffer.len(), "Failed to persist delivery buffer");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::BUFFER, format!("Persist failed: {}", e))
                        .await;
                }
            }
        }
    }

    async fn mark_delivered(&self) {
        if let Some(health) = &self.health {
            health.set_healthy(components::DELIVERY).await;
        }
    }

    async fn mark_failed(&self, e: &DeliveryError) {
        if let Some(health) = &self.health {
            health
                .set_degraded(components::DELIVERY, e.to_string())
                .await;
        }
    }
}

/// Builder for DeliveryClient configuration
pub struct DeliveryClientBuilder {
    config: ClientConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl DeliveryClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn buffer_config(mut self, buffer: BufferConfig) -> Self {
        self.config.buffer = buffer;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Validate the configuration and load the buffer from disk
    pub fn build(self) -> Result<DeliveryClient> {
        if self.config.api_key.trim().is_empty() {
            anyhow::bail!("api_key is required");
        }
        let base_url = Url::parse(&self.config.base_url).context("Invalid collector URL")?;

        let http = Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let buffer = DeliveryBuffer::load(self.config.buffer);
        let metrics = AgentMetrics::new();
        metrics.set_buffer_items(buffer.len() as i64);

        Ok(DeliveryClient {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            api_key: self.config.api_key,
            buffer: Mutex::new(buffer),
            flushing: AtomicBool::new(false),
            health: self.health,
            metrics,
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("unknown")),
        })
    }
}

impl Default for DeliveryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
