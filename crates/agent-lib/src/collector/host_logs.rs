//! Host log collection from the systemd journal, with a syslog fallback
//!
//! The journal is queried as JSON lines bounded by a `--since` filter. The
//! newest entry time is remembered and becomes the next lower bound, so
//! consecutive rounds do not resend the same entries. The plain-text
//! fallback just tails a well-known file and may repeat lines.

use super::Collector;
use crate::models::{LogLevel, LogRecord, LogSource, Metadata};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

/// Bytes read from the end of a fallback log file
const TAIL_WINDOW_BYTES: u64 = 256 * 1024;

/// Configuration for host log collection
#[derive(Debug, Clone)]
pub struct HostLogConfig {
    /// Look-back window for the first journal query
    pub window: Duration,
    /// Maximum lines per round
    pub max_lines: usize,
    /// Journal query binary
    pub journalctl: PathBuf,
    /// Plain-text logs tried in order when the journal is unavailable
    pub fallback_paths: Vec<PathBuf>,
}

impl Default for HostLogConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5 * 60),
            max_lines: 100,
            journalctl: PathBuf::from("journalctl"),
            fallback_paths: vec![
                PathBuf::from("/var/log/syslog"),
                PathBuf::from("/var/log/messages"),
                PathBuf::from("/var/log/system.log"),
            ],
        }
    }
}

/// Collects recent host log lines
pub struct HostLogCollector {
    config: HostLogConfig,
    journal_available: OnceCell<bool>,
    last_seen: Mutex<Option<DateTime<Utc>>>,
}

impl HostLogCollector {
    pub fn new(config: HostLogConfig) -> Self {
        Self {
            config,
            journal_available: OnceCell::new(),
            last_seen: Mutex::new(None),
        }
    }

    /// Newest journal entry time delivered so far
    pub async fn last_seen(&self) -> Option<DateTime<Utc>> {
        *self.last_seen.lock().await
    }

    /// Forget the journal high-water mark
    pub async fn reset(&self) {
        *self.last_seen.lock().await = None;
    }

    async fn has_journal(&self) -> bool {
        *self
            .journal_available
            .get_or_init(|| async {
                let available = Command::new(&self.config.journalctl)
                    .arg("--version")
                    .output()
                    .await
                    .map(|out| out.status.success())
                    .unwrap_or(false);
                debug!(available, "Probed for systemd journal");
                available
            })
            .await
    }

    async fn collect_journal(&self) -> Result<Vec<LogRecord>> {
        let previous = self.last_seen().await;
        let since = previous.unwrap_or_else(|| Utc::now() - window(&self.config));

        let output = Command::new(&self.config.journalctl)
            .arg(format!("--since=@{}", since.timestamp()))
            .args(["-o", "json", "-n"])
            .arg(self.config.max_lines.to_string())
            .arg("--no-pager")
            .output()
            .await
            .context("Failed to run journalctl")?;

        if !output.status.success() {
            bail!(
                "journalctl exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut records = Vec::new();
        let mut newest: Option<DateTime<Utc>> = None;

        for line in stdout.lines() {
            let Some((record, timestamp)) = parse_journal_line(line) else {
                continue;
            };
            // --since has whole-second resolution; drop what was already sent
            if previous.is_some_and(|mark| timestamp <= mark) {
                continue;
            }
            newest = Some(newest.map_or(timestamp, |t| t.max(timestamp)));
            records.push(record);
        }

        if let Some(newest) = newest {
            let mut last_seen = self.last_seen.lock().await;
            *last_seen = Some(newest);
        }

        Ok(records)
    }

    async fn collect_fallback(&self) -> Result<Vec<LogRecord>> {
        let Some(path) = first_existing(&self.config.fallback_paths).await else {
            debug!("No plain-text system log found");
            return Ok(Vec::new());
        };

        let lines = tail_lines(&path, self.config.max_lines).await?;
        Ok(lines.iter().map(|line| parse_syslog_line(line)).collect())
    }
}

impl Default for HostLogCollector {
    fn default() -> Self {
        Self::new(HostLogConfig::default())
    }
}

#[async_trait]
impl Collector for HostLogCollector {
    type Output = LogRecord;

    fn name(&self) -> &'static str {
        "host_logs"
    }

    async fn collect(&self) -> Vec<LogRecord> {
        let result = if self.has_journal().await {
            self.collect_journal().await
        } else {
            self.collect_fallback().await
        };

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to collect system logs");
            Vec::new()
        })
    }
}

fn window(config: &HostLogConfig) -> chrono::Duration {
    chrono::Duration::from_std(config.window).unwrap_or_else(|_| chrono::Duration::minutes(5))
}

/// Decode one `journalctl -o json` line
///
/// Returns `None` for malformed lines and entries without a message.
pub fn parse_journal_line(line: &str) -> Option<(LogRecord, DateTime<Utc>)> {
    let entry: Value = serde_json::from_str(line).ok()?;
    let message = entry.get("MESSAGE")?.as_str()?;
    if message.trim().is_empty() {
        return None;
    }

    let priority = entry
        .get("PRIORITY")
        .and_then(as_u64_lenient)
        .unwrap_or(6);

    let timestamp = entry
        .get("__REALTIME_TIMESTAMP")
        .and_then(as_u64_lenient)
        .and_then(|us| DateTime::<Utc>::from_timestamp_micros(us as i64))
        .unwrap_or_else(Utc::now);

    let unit = entry
        .get("_SYSTEMD_UNIT")
        .or_else(|| entry.get("SYSLOG_IDENTIFIER"))
        .cloned()
        .unwrap_or_else(|| Value::from("unknown"));

    let mut metadata = Metadata::new();
    metadata.insert("unit".into(), unit);
    metadata.insert(
        "pid".into(),
        entry
            .get("_PID")
            .or_else(|| entry.get("SYSLOG_PID"))
            .cloned()
            .unwrap_or(Value::Null),
    );
    metadata.insert(
        "hostname".into(),
        entry.get("_HOSTNAME").cloned().unwrap_or(Value::Null),
    );

    let record = LogRecord::new(
        journal_priority_level(priority),
        LogSource::System,
        message,
        metadata,
    );
    Some((record, timestamp))
}

/// Map a syslog priority (0 emerg .. 7 debug) to a level
pub fn journal_priority_level(priority: u64) -> LogLevel {
    match priority {
        0..=3 => LogLevel::Error,
        4 => LogLevel::Warning,
        7 => LogLevel::Debug,
        _ => LogLevel::Info,
    }
}

/// Journal fields are strings; accept numbers too
fn as_u64_lenient(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_u64(),
    }
}

/// Build a record from an unparsed syslog line
pub fn parse_syslog_line(line: &str) -> LogRecord {
    let lower = line.to_lowercase();
    let level = if lower.contains("err") || lower.contains("fatal") {
        LogLevel::Error
    } else if lower.contains("warn") {
        LogLevel::Warning
    } else if lower.contains("debug") {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let mut metadata = Metadata::new();
    metadata.insert("raw".into(), Value::Bool(true));
    LogRecord::new(level, LogSource::System, line, metadata)
}

async fn first_existing(paths: &[PathBuf]) -> Option<PathBuf> {
    for path in paths {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.is_file() {
                return Some(path.clone());
            }
        }
    }
    None
}

/// Last `n` non-empty lines of a file, reading at most the final 256 KiB
pub async fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(TAIL_WINDOW_BYTES);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        // The first line was cut by the seek
        lines.remove(0);
    }

    let lines: Vec<String> = lines
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines.into_iter().skip(skip).collect())
}
