//! Broker adapters
//!
//! The adapter traits live in `pubgate-core` so third-party adapters only
//! depend on that crate. This module re-exports them next to the built-in
//! in-memory adapter.

mod memory;

pub use memory::{MemoryBroker, MemorySession, PublishMode};
pub use pubgate_core::{
    BrokerConnector, BrokerError, BrokerSession, InboundMessage, MessageHandler, SessionOptions,
    SessionStatus, SubscriptionHandle,
};
