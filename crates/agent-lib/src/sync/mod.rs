//! Delivery to the collector service
//!
//! This module provides:
//! - HTTP client that posts telemetry with the agent's API key
//! - Durable local buffer for payloads that could not be delivered
//! - Opportunistic re-delivery of the buffer after every successful send

mod buffer;
mod client;


pub use buffer::{BufferConfig, BufferStats, BufferedItem, DeliveryBuffer, PayloadKind};
pub use client::{
    Ack, ClientConfig, DeliveryClient, DeliveryClientBuilder, DeliveryError, FlushOutcome,
    API_KEY_HEADER, HEARTBEAT_PATH,
};
