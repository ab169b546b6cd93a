//! Error types for pubgate

use thiserror::Error;

// Re-export BrokerError from pubgate-core
pub use pubgate_core::BrokerError;

/// Result type alias for pubgate operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
///
/// `NotConnected` and `ShuttingDown` are the only errors a caller of
/// [`Gateway::publish`](crate::Gateway::publish) can see: write and
/// serialization failures happen on the publisher worker after the call
/// returned, and end up in the logs and the failure sink instead.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not open the broker sessions
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] BrokerError),

    /// `connect` was called on a gateway that already connected once
    #[error("gateway already connected")]
    AlreadyConnected,

    /// Operation attempted outside the connected state
    #[error("gateway connection has not been established")]
    NotConnected,

    /// Publish attempted after shutdown began
    #[error("shutdown initiated, not accepting publish requests")]
    ShuttingDown,

    /// Payload could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Broker did not take a message
    #[error("publish to '{topic}' failed: {source}")]
    PublishWrite {
        topic: String,
        #[source]
        source: BrokerError,
    },

    /// Inbound payload could not be decoded
    #[error("failed to deserialize message on '{topic}': {message}")]
    Deserialization { topic: String, message: String },

    /// Broker refused a subscription
    #[error("subscribe to '{topic}' failed: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BrokerError,
    },

    /// The task closing the gateway failed before reporting
    #[error("shutdown did not complete: {0}")]
    ShutdownFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl GatewayError {
    /// Whether the caller may retry after reconnecting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GatewayError::NotConnected | GatewayError::Connect(_) | GatewayError::Io(_)
        )
    }
}
