//! Connection handle
//!
//! Owns the two broker sessions of a gateway: one for subscriptions and a
//! dedicated one for the publisher worker, so slow writes never hold up
//! deliveries. The publisher session is closed by the worker when it drains;
//! the subscriber session is closed here, last.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use pubgate_core::{BrokerConnector, BrokerSession, SessionStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Client id suffix of the publisher session
pub const PUBLISHER_SUFFIX: &str = "publisher";

/// The broker sessions opened by one `connect`
pub struct ConnectionHandle {
    protocol: &'static str,
    subscriber: Arc<dyn BrokerSession>,
    publisher: Arc<dyn BrokerSession>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    /// Open the subscriber session, then the publisher session
    ///
    /// If the publisher session cannot be opened the subscriber session is
    /// closed again before the error is returned.
    pub async fn connect(connector: &dyn BrokerConnector, config: &GatewayConfig) -> Result<Self> {
        let options = config.session_options();

        let subscriber = connector
            .open_subscriber_session(&options)
            .await
            .map_err(GatewayError::Connect)?;

        let publisher_options = options.with_client_suffix(PUBLISHER_SUFFIX);
        let publisher = match connector.open_publisher_session(&publisher_options).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = subscriber.close().await {
                    warn!(error = %close_err, "Failed to close subscriber session after connect error");
                }
                return Err(GatewayError::Connect(e));
            }
        };

        info!(
            protocol = connector.protocol(),
            url = %options.url,
            client_id = %options.client_id,
            "Broker sessions opened"
        );

        Ok(Self {
            protocol: connector.protocol(),
            subscriber,
            publisher,
            closed: AtomicBool::new(false),
        })
    }

    /// Whether the handle is open and the subscriber session is connected
    ///
    /// Never fails; false once the handle has been closed.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.subscriber.status().is_connected()
    }

    /// Status reported by the subscriber session
    pub fn status(&self) -> SessionStatus {
        if self.closed.load(Ordering::Acquire) {
            SessionStatus::Closed
        } else {
            self.subscriber.status()
        }
    }

    /// Protocol of the connector that opened the sessions
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Session used for subscriptions
    pub fn subscriber(&self) -> &Arc<dyn BrokerSession> {
        &self.subscriber
    }

    /// Session handed to the publisher worker
    pub fn publisher(&self) -> Arc<dyn BrokerSession> {
        Arc::clone(&self.publisher)
    }

    /// Close the subscriber session and mark the handle closed
    ///
    /// Only the first call closes anything.
    pub async fn close_subscriber(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.subscriber.close().await.map_err(GatewayError::Connect)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("protocol", &self.protocol)
            .field("subscriber", &self.subscriber.name())
            .field("publisher", &self.publisher.name())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
