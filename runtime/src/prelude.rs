//! Convenience re-exports for gateway users.
//!
//! ```rust
//! use pubgate_runtime::prelude::*;
//! ```

// Broker adapter traits
pub use pubgate_core::{BrokerConnector, BrokerSession, SessionOptions, SessionStatus};

// Gateway
pub use pubgate_gateway::{
    DrainReport, Gateway, GatewayConfig, LifecycleState, MessageConsumer, SubscriptionInfo,
};

// Built-in adapter
pub use pubgate_gateway::{MemoryBroker, PublishMode};

// Failure sinks
pub use pubgate_gateway::{FailureSink, FileFailureSink, MemoryFailureSink};

// Error types
pub use pubgate_gateway::{BrokerError, GatewayError};

pub use std::sync::Arc;

// Runtime
pub use crate::RuntimeBuilder;
