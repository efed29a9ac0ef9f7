//! Agent configuration
//!
//! Read from an optional `agent.{toml,yaml,json}` file, overlaid by
//! unprefixed environment variables (`BACKEND_URL`, `API_KEY`, ...).

use agent_lib::collector::docker::DEFAULT_SOCKET;
use agent_lib::scheduler::SchedulerConfig;
use agent_lib::sync::BufferConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Name of the buffer file inside the data directory
const BUFFER_FILE: &str = "buffer.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API_KEY environment variable is required")]
    MissingApiKey,

    #[error("invalid backend URL {0:?}: expected http:// or https://")]
    InvalidBackendUrl(String),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Collector service base URL
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Static key sent with every request
    #[serde(default)]
    pub api_key: String,

    /// Metrics collection interval in seconds
    #[serde(default = "default_collect_interval")]
    pub collect_interval: u64,

    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    /// Log collection interval in seconds
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,

    /// Service check interval in seconds
    #[serde(default = "default_service_check_interval")]
    pub service_check_interval: u64,

    /// Maximum number of buffered payloads
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Buffer retention in seconds
    #[serde(default = "default_max_buffer_age")]
    pub max_buffer_age: u64,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_docker_socket")]
    pub docker_socket: PathBuf,

    /// JSON list of service targets to check
    #[serde(default)]
    pub services_file: Option<PathBuf>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Outbound request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default = "default_node_name")]
    pub node_name: String,
}

fn default_backend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_collect_interval() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_log_interval() -> u64 {
    300
}

fn default_service_check_interval() -> u64 {
    60
}

fn default_max_buffer_size() -> usize {
    1000
}

fn default_max_buffer_age() -> u64 {
    86_400
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET)
}

fn default_api_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    10
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("agent").required(false))
            .add_source(config::Environment::default())
            .build()?;

        Self::from_config(config)
    }

    /// Deserialize and validate an assembled configuration
    pub fn from_config(config: config::Config) -> Result<Self, ConfigError> {
        let agent: AgentConfig = config.try_deserialize()?;
        agent.validate()?;
        Ok(agent)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBackendUrl(self.backend_url.clone()));
        }

        let intervals = [
            ("COLLECT_INTERVAL", self.collect_interval),
            ("HEARTBEAT_INTERVAL", self.heartbeat_interval),
            ("LOG_INTERVAL", self.log_interval),
            ("SERVICE_CHECK_INTERVAL", self.service_check_interval),
            ("REQUEST_TIMEOUT", self.request_timeout),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::ZeroInterval(*name));
        }

        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            metrics_interval: Duration::from_secs(self.collect_interval),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            logs_interval: Duration::from_secs(self.log_interval),
            services_interval: Duration::from_secs(self.service_check_interval),
            ..Default::default()
        }
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            max_age: Duration::from_secs(self.max_buffer_age),
            max_items: self.max_buffer_size,
            path: Some(self.data_dir.join(BUFFER_FILE)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}
