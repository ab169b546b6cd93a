//! Error types for broker adapters

use thiserror::Error;

/// Error type for broker adapter operations
///
/// Every [`BrokerSession`](crate::BrokerSession) and
/// [`BrokerConnector`](crate::BrokerConnector) reports failures through this
/// type. The variants are coarse on purpose: the gateway only needs to know
/// whether a connect, a write or a subscribe failed, and keeps the adapter's
/// message for the logs.
///
/// # Example
///
/// ```
/// use pubgate_core::BrokerError;
///
/// fn write() -> Result<(), BrokerError> {
///     Err(BrokerError::Timeout("no ack within 2s".to_string()))
/// }
///
/// match write() {
///     Ok(()) => println!("written"),
///     Err(BrokerError::Timeout(msg)) => println!("broker too slow: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Connection error
    ///
    /// Returned when a session cannot be opened.
    /// Examples: broker unreachable, bad URL, TLS handshake failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Write failed
    ///
    /// Returned when the broker did not take the message.
    /// Examples: connection dropped mid-write, outbound buffer closed.
    #[error("write failed: {0}")]
    Write(String),

    /// Timed out waiting for the broker
    ///
    /// Returned by acknowledged protocols when no ack arrives in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The broker answered with an error
    ///
    /// Returned by stream protocols whose publish ack carries an error.
    /// Examples: no stream bound to the subject, stream limits exceeded.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// Subscribe failed
    ///
    /// Returned when the broker refused a (durable) subscription.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// The session is closed
    #[error("session closed")]
    Closed,

    /// Closing the session failed
    #[error("close failed: {0}")]
    Close(String),
}

impl BrokerError {
    /// Whether the error means the message may or may not have reached the broker
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let err = BrokerError::Rejected("no stream matches subject".into());
        assert_eq!(
            err.to_string(),
            "rejected by broker: no stream matches subject"
        );
        assert_eq!(BrokerError::Closed.to_string(), "session closed");
    }

    #[test]
    fn test_is_timeout() {
        assert!(BrokerError::Timeout("ack".into()).is_timeout());
        assert!(!BrokerError::Write("eof".into()).is_timeout());
    }
}
