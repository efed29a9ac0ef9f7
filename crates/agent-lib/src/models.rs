//! Core data models for the monitoring agent
//!
//! Field names follow the collector service's JSON contract (camelCase).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum length of a log message, in characters
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Free-form provenance attached to samples and log records
pub type Metadata = Map<String, Value>;

/// One metric observation produced by a collection round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub metric_type: String,
    pub value: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MetricSample {
    pub fn new(metric_type: impl Into<String>, value: f64, metadata: Metadata) -> Self {
        Self {
            metric_type: metric_type.into(),
            value,
            metadata,
        }
    }
}

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

/// Where a log record originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    System,
    #[serde(alias = "docker")]
    Container,
}

/// A single log line, normalized for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl LogRecord {
    /// Build a record, truncating the message to [`MAX_MESSAGE_CHARS`]
    pub fn new(level: LogLevel, source: LogSource, message: &str, metadata: Metadata) -> Self {
        Self {
            level,
            source,
            message: truncate_chars(message, MAX_MESSAGE_CHARS).to_string(),
            metadata,
        }
    }
}

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Protocol of a monitored service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Http,
    Https,
    Postgresql,
    Mysql,
    Mongodb,
}

impl ServiceType {
    /// Whether this target is probed over HTTP rather than raw TCP
    pub fn is_http(&self) -> bool {
        matches!(self, ServiceType::Http | ServiceType::Https)
    }

    /// Well-known port used when an endpoint omits one
    pub fn default_port(&self) -> u16 {
        match self {
            ServiceType::Postgresql => 5432,
            ServiceType::Mysql => 3306,
            ServiceType::Mongodb => 27017,
            _ => 3306,
        }
    }
}

fn default_timeout_seconds() -> u64 {
    10
}

/// An endpoint the collector service asked this agent to health-check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTarget {
    pub id: i64,
    #[serde(rename = "type", alias = "serviceType", alias = "service_type")]
    pub service_type: ServiceType,
    pub endpoint: String,
    #[serde(default, alias = "expected_status_code")]
    pub expected_status_code: Option<u16>,
    #[serde(default = "default_timeout_seconds", alias = "timeout")]
    pub timeout_seconds: u64,
}

/// Outcome classification of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Degraded,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Degraded => "degraded",
            CheckStatus::Down => "down",
        }
    }
}

/// Result of probing one service target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub service_id: i64,
    pub status: CheckStatus,
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

impl CheckResult {
    /// Result for a probe that could not run at all
    pub fn check_failed(service_id: i64, cause: impl std::fmt::Display) -> Self {
        Self {
            service_id,
            status: CheckStatus::Down,
            response_time_ms: 0,
            status_code: None,
            error_message: Some(format!("Check failed: {}", cause)),
        }
    }
}

/// Identity of a container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub container_id: String,
    pub container_name: String,
    pub image: String,
    pub status: String,
    pub created: i64,
}
