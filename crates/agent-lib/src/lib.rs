//! Agent library for host and container telemetry
//!
//! This crate provides the core functionality for:
//! - Host metrics and system log collection
//! - Container metrics and log collection over the Docker socket
//! - HTTP and TCP service health checks
//! - Buffered, at-least-once delivery to the collector service
//! - Scheduling, health checks and observability

pub mod collector;
pub mod health;
pub mod models;
pub mod observability;
pub mod probe;
pub mod scheduler;
pub mod sync;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use scheduler::{Pipeline, RoundReport, Scheduler, SchedulerConfig, SchedulerHandle, TaskKind};
