//! Service health checks
//!
//! HTTP and HTTPS targets get a GET request; database targets get a raw
//! TCP connect. Every target is probed concurrently and always yields a
//! result, so one broken target never hides the others.

mod http;
mod tcp;

pub use http::{
    classify_message, classify_status, describe_error, HttpChecker, DEFAULT_EXPECTED_STATUS,
    MAX_REDIRECTS, USER_AGENT,
};
pub use tcp::{parse_endpoint, TcpChecker, CONNECTED, NOT_CONNECTED};

use crate::models::{CheckResult, ServiceTarget};
use anyhow::{Context, Result};
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// In-memory cache of the targets this agent should check
///
/// Targets are owned by the collector service; the cache is only ever
/// replaced wholesale.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    targets: Arc<RwLock<Vec<ServiceTarget>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached targets
    pub async fn replace(&self, targets: Vec<ServiceTarget>) {
        let mut cached = self.targets.write().await;
        *cached = targets;
    }

    /// Snapshot of the cached targets
    pub async fn list(&self) -> Vec<ServiceTarget> {
        self.targets.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }

    /// Load targets from a JSON array file, replacing the cache
    pub async fn load_file(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read services file {}", path.display()))?;
        let targets: Vec<ServiceTarget> = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse services file {}", path.display()))?;

        let count = targets.len();
        self.replace(targets).await;
        info!(path = %path.display(), count, "Loaded service targets");
        Ok(count)
    }
}

/// Runs the right checker for each target
#[derive(Debug, Clone)]
pub struct ServiceProber {
    http: HttpChecker,
    tcp: TcpChecker,
}

impl ServiceProber {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpChecker::new()?,
            tcp: TcpChecker::new(),
        })
    }

    /// Probe one target, converting a checker error into a `down` result
    pub async fn check(&self, target: &ServiceTarget) -> CheckResult {
        let outcome = if target.service_type.is_http() {
            self.http.check(target).await
        } else {
            self.tcp.check(target).await
        };

        outcome.unwrap_or_else(|e| {
            warn!(service_id = target.id, error = %e, "Service check failed to run");
            let mut result = CheckResult::check_failed(target.id, e);
            if !target.service_type.is_http() {
                result.status_code = Some(NOT_CONNECTED);
            }
            result
        })
    }

    /// Probe every target concurrently; results keep the input order
    pub async fn check_all(&self, targets: &[ServiceTarget]) -> Vec<CheckResult> {
        join_all(targets.iter().map(|t| self.check(t))).await
    }
}
