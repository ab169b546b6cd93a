//! pubgate-core - Broker adapter interface for pubgate
//!
//! This crate holds the types shared between the pubgate gateway and broker
//! adapters that live outside it:
//!
//! - [`BrokerConnector`] - opens subscriber and publisher sessions
//! - [`BrokerSession`] - write, durable subscribe, status, close
//! - [`InboundMessage`] / [`MessageHandler`] - the delivery path
//! - [`BrokerError`] - error type for adapter operations
//!
//! # Why this crate exists
//!
//! Adapters for a concrete broker client (NATS, NATS streaming, JetStream)
//! only need these traits. Keeping them here lets an adapter crate depend on
//! `pubgate-core` without pulling in the gateway, and lets the gateway
//! optionally depend on adapters without a cycle:
//!
//! ```text
//! pubgate-core ◄── pubgate-gateway
//!     ▲
//!     └────────── pubgate-nats (adapter)
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
mod message;
mod session;

pub use error::BrokerError;
pub use message::{InboundMessage, MessageHandler};
pub use session::{
    BrokerConnector, BrokerSession, SessionOptions, SessionStatus, SubscriptionHandle,
};
