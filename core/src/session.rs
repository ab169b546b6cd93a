//! Broker adapter traits
//!
//! A broker adapter is two things: a [`BrokerConnector`] that opens sessions,
//! and the [`BrokerSession`]s it returns. The gateway is written once against
//! these traits; fire-and-forget, acknowledged and stream-acknowledged
//! protocols only differ in what their `write` waits for.

use crate::error::BrokerError;
use crate::message::MessageHandler;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Connectivity of a broker session as reported by the client library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Session is up and usable
    Connected,
    /// Session is (re)establishing its connection
    Connecting,
    /// Connection was lost
    Disconnected,
    /// Session was closed and cannot be used again
    Closed,
}

impl SessionStatus {
    /// Whether the session can take writes and subscriptions
    pub fn is_connected(self) -> bool {
        matches!(self, SessionStatus::Connected)
    }
}

/// Parameters used to open a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Broker URL (e.g. `nats://localhost:4222`)
    pub url: String,
    /// Client identity presented to the broker
    pub client_id: String,
    /// Cluster the client joins, for protocols that have one
    pub cluster_id: Option<String>,
    /// Whether the session must use TLS
    pub tls: bool,
}

impl SessionOptions {
    /// Create options for `url` with the given client identity
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            cluster_id: None,
            tls: false,
        }
    }

    /// Same options with the client id suffixed, e.g. `orders` -> `orders-publisher`
    pub fn with_client_suffix(&self, suffix: &str) -> Self {
        Self {
            client_id: format!("{}-{}", self.client_id, suffix),
            ..self.clone()
        }
    }
}

/// Handle to an open broker-side subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Adapter-assigned subscription id
    pub id: u64,
    /// Subscribed topic
    pub topic: String,
    /// Durable name the subscription was registered under
    pub durable_name: String,
}

/// One broker session
///
/// # Implementation Requirements
///
/// - Sessions are shared between tasks, so they must be `Send + Sync`
/// - `status` is called on every publish and must be cheap and infallible
/// - `write` resolves once the protocol considers the message handed over
/// - handlers passed to `subscribe_durable` are invoked on the adapter's own
///   dispatch task, never on the caller of `write`
/// - `close` must be idempotent
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Short adapter name used in logs, e.g. "memory", "nats"
    fn name(&self) -> &'static str;

    /// Current connectivity
    fn status(&self) -> SessionStatus;

    /// Write one message to `topic`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The broker accepted the message
    /// * `Err(BrokerError)` - The message was not accepted, or no ack came back
    async fn write(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Open a durable subscription on `topic`
    ///
    /// Brokers that support durability resume delivery for an existing
    /// `durable_name` instead of creating a second subscription.
    async fn subscribe_durable(
        &self,
        topic: &str,
        durable_name: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, BrokerError>;

    /// Close the session and release its resources
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Opens broker sessions
///
/// The gateway opens two sessions per connect: one for subscriptions and a
/// dedicated one for publishing, so slow writes never hold up deliveries.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Protocol name, e.g. "nats", "stan", "jetstream"
    fn protocol(&self) -> &'static str;

    /// Open the session used for subscriptions
    async fn open_subscriber_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError>;

    /// Open the session used by the publisher worker
    async fn open_publisher_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError>;
}
