//! pubgate - publish/subscribe gateway
//!
//! A uniform façade between application code and a message broker:
//! non-blocking publish, durable JSON subscriptions and a shutdown that
//! accounts for every accepted message.
//!
//! # Publish pipeline
//!
//! ```text
//! callers ──publish──► PublishQueue ──► PublisherWorker ──► broker
//!                                              │
//!                                              └─ failed writes ──► FailureSink
//! ```
//!
//! Broker protocols plug in through the adapter traits of `pubgate-core`;
//! the pipeline is written once against them.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod broker;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod failure;
pub mod gateway;
pub mod metrics;
pub mod metrics_server;
pub mod publish;
pub mod subscribe;

pub use broker::{MemoryBroker, PublishMode};
pub use config::{GatewayConfig, LogFormat};
pub use connection::ConnectionHandle;
pub use error::{BrokerError, GatewayError, Result};
pub use failure::{FailureRecord, FailureSink, FileFailureSink, MemoryFailureSink};
pub use gateway::{Gateway, LifecycleState};
pub use metrics::Metrics;
pub use metrics_server::MetricsServer;
pub use publish::DrainReport;
pub use subscribe::{MessageConsumer, SubscriptionInfo};
