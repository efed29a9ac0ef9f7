//! Durable buffer for payloads the collector service did not accept
//!
//! Failed payloads are queued with the time they were first enqueued and
//! written to a JSON file, so an outage that spans a restart loses nothing
//! short of eviction:
//! - entries older than the retention period are dropped
//! - beyond the entry limit, the oldest entries are dropped first

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default retention period (24 hours)
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default maximum number of buffered payloads
const DEFAULT_MAX_ITEMS: usize = 1000;

/// What a buffered payload is, and so where it must be re-sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Metrics,
    Services,
    Logs,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Metrics => "metrics",
            PayloadKind::Services => "services",
            PayloadKind::Logs => "logs",
        }
    }

    /// Ingestion path on the collector service
    pub fn path(&self) -> &'static str {
        match self {
            PayloadKind::Metrics => "/api/agent/metrics",
            PayloadKind::Services => "/api/agent/services",
            PayloadKind::Logs => "/api/agent/logs",
        }
    }
}

/// One payload waiting for re-delivery
///
/// The payload is the complete request body, so each item can be re-sent
/// on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedItem {
    pub kind: PayloadKind,
    pub payload: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
}

impl BufferedItem {
    /// Stored with millisecond precision, matching the file format
    pub fn new(kind: PayloadKind, payload: Value, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            payload,
            enqueued_at: enqueued_at.trunc_subsecs(3),
        }
    }
}

/// Configuration for the delivery buffer
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Entries older than this are evicted
    pub max_age: Duration,
    /// Maximum number of entries kept
    pub max_items: usize,
    /// Backing file; `None` keeps the buffer in memory only
    pub path: Option<PathBuf>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            max_items: DEFAULT_MAX_ITEMS,
            path: None,
        }
    }
}

/// Buffer statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferStats {
    /// Number of entries in buffer
    pub entries: usize,
    /// Maximum number of entries
    pub capacity: usize,
    /// Oldest enqueue time (Unix milliseconds)
    pub oldest_timestamp: Option<i64>,
    /// Newest enqueue time (Unix milliseconds)
    pub newest_timestamp: Option<i64>,
    /// Retention period in seconds
    pub retention_seconds: u64,
}

/// Ordered queue of undelivered payloads, oldest first
#[derive(Debug)]
pub struct DeliveryBuffer {
    items: VecDeque<BufferedItem>,
    config: BufferConfig,
}

impl DeliveryBuffer {
    /// Create an empty buffer without reading the backing file
    pub fn new(config: BufferConfig) -> Self {
        Self {
            items: VecDeque::new(),
            config,
        }
    }

    /// Create a buffer from its backing file
    ///
    /// A missing or unreadable file yields an empty buffer. Entries already
    /// past the limits are evicted immediately.
    pub fn load(config: BufferConfig) -> Self {
        let mut buffer = Self::new(config);

        let Some(path) = buffer.config.path.clone() else {
            return buffer;
        };
        if !path.exists() {
            debug!(path = %path.display(), "No buffer file, starting empty");
            return buffer;
        }

        match read_items(&path) {
            Ok(items) => {
                buffer.items = items.into();
                let evicted = buffer.evict(Utc::now());
                info!(
                    path = %path.display(),
                    entries = buffer.items.len(),
                    evicted,
                    "Loaded delivery buffer from disk"
                );
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load delivery buffer, starting empty"
                );
            }
        }

        buffer
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Queue a payload at the back
    pub fn push(&mut self, item: BufferedItem) {
        self.items.push_back(item);
    }

    /// Drop expired entries, then the oldest entries over the limit
    ///
    /// Returns the number of entries removed.
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.items.len();

        let max_age = chrono::Duration::from_std(self.config.max_age)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = now - max_age;
        self.items.retain(|item| item.enqueued_at >= cutoff);

        let excess = self.items.len().saturating_sub(self.config.max_items);
        self.items.drain(..excess);

        let evicted = before - self.items.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.items.len(), "Evicted buffered payloads");
        }
        evicted
    }

    /// Apply eviction and write the buffer to its backing file
    ///
    /// Writes to a temp file and renames it over the old one. Without a
    /// backing file this only evicts.
    pub fn persist(&mut self) -> Result<()> {
        self.evict(Utc::now());

        let Some(path) = self.config.path.as_deref() else {
            return Ok(());
        };
        save_items(path, &self.items)?;
        debug!(path = %path.display(), entries = self.items.len(), "Buffer persisted");
        Ok(())
    }

    /// Copy of every entry, oldest first
    pub fn snapshot(&self) -> Vec<BufferedItem> {
        self.items.iter().cloned().collect()
    }

    /// Remove the first entry equal to `item`; false if it is gone already
    pub fn remove(&mut self, item: &BufferedItem) -> bool {
        match self.items.iter().position(|i| i == item) {
            Some(index) => self.items.remove(index).is_some(),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            entries: self.items.len(),
            capacity: self.config.max_items,
            oldest_timestamp: self.items.iter().map(|i| i.enqueued_at.timestamp_millis()).min(),
            newest_timestamp: self.items.iter().map(|i| i.enqueued_at.timestamp_millis()).max(),
            retention_seconds: self.config.max_age.as_secs(),
        }
    }
}

fn read_items(path: &Path) -> Result<Vec<BufferedItem>> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read buffer file {:?}", path))?;
    serde_json::from_slice(&data).context("Failed to deserialize buffer data")
}

fn save_items(path: &Path, items: &VecDeque<BufferedItem>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_vec_pretty(items).context("Failed to serialize buffer")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
    file.write_all(&json).context("Failed to write buffer data")?;
    file.sync_all().context("Failed to sync buffer file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
    Ok(())
}
