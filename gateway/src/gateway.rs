//! The gateway: lifecycle coordinator and public surface
//!
//! ```text
//! Created ──connect──► Connected ──shutdown──► Draining ──worker done──► Closed
//! ```
//!
//! The lifecycle is linear. A failed `connect` returns to `Created`; nothing
//! leaves `Closed`.

use crate::config::GatewayConfig;
use crate::connection::ConnectionHandle;
use crate::error::{GatewayError, Result};
use crate::failure::{FailureSink, FileFailureSink};
use crate::publish::{DrainReport, PublishQueue, PublishTask, PublisherWorker};
use crate::subscribe::{MessageConsumer, SubscriptionInfo, SubscriptionRegistry};
use parking_lot::Mutex;
use pubgate_core::BrokerConnector;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Not connected yet (or the last connect failed)
    Created,
    /// Accepting publishes and subscriptions
    Connected,
    /// Shutdown started; the worker is draining the queue
    Draining,
    /// Drained and disconnected; terminal
    Closed,
}

/// Everything started by a successful connect
struct Connection {
    handle: Arc<ConnectionHandle>,
    queue: Arc<PublishQueue>,
    interrupt: watch::Sender<bool>,
    done: oneshot::Receiver<DrainReport>,
    worker: JoinHandle<()>,
}

enum Lifecycle {
    Created,
    Connecting,
    Connected(Connection),
    Draining {
        handle: Arc<ConnectionHandle>,
        queue: Arc<PublishQueue>,
    },
    Closed,
}

/// Publish/subscribe gateway
///
/// `publish` never waits on the network: it appends to the publish queue and
/// returns. A single worker task writes queued messages in order through a
/// dedicated publisher session and records failed writes in the failure
/// sink. `shutdown` returns once every accepted message was sent, recorded
/// as failed, or (if it could not be serialized) dropped and logged.
///
/// # Example
///
/// ```no_run
/// use pubgate_gateway::{Gateway, GatewayConfig, broker::MemoryBroker};
/// use std::sync::Arc;
///
/// # async fn example() -> pubgate_gateway::Result<()> {
/// let gateway = Gateway::new(
///     GatewayConfig::new("memory://local", "metadb"),
///     Arc::new(MemoryBroker::default()),
/// );
/// gateway.connect().await?;
/// gateway.publish("samples.created", serde_json::json!({"x": 1}))?;
/// let report = gateway.shutdown().await?;
/// assert_eq!(report.total(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    config: GatewayConfig,
    connector: Arc<dyn BrokerConnector>,
    failure_sink: Option<Arc<dyn FailureSink>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl Gateway {
    /// Create an unconnected gateway
    pub fn new(config: GatewayConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            config,
            connector,
            failure_sink: None,
            lifecycle: Arc::new(Mutex::new(Lifecycle::Created)),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
        }
    }

    /// Record failed writes in `sink` instead of the configured failure file
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    /// Configuration the gateway was built with
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Open the broker sessions and start the publisher worker
    ///
    /// Must be called once. Fails with `AlreadyConnected` unless the gateway
    /// is in `Created`.
    pub async fn connect(&self) -> Result<()> {
        self.config.validate()?;
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Created) {
                return Err(GatewayError::AlreadyConnected);
            }
            *lifecycle = Lifecycle::Connecting;
        }

        match self.start().await {
            Ok(connection) => {
                *self.lifecycle.lock() = Lifecycle::Connected(connection);
                info!(
                    protocol = self.connector.protocol(),
                    client_id = %self.config.client_id,
                    "Gateway connected"
                );
                Ok(())
            }
            Err(e) => {
                *self.lifecycle.lock() = Lifecycle::Created;
                error!(error = %e, "Gateway connect failed");
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<Connection> {
        // Opened first so a bad path leaves no sessions behind
        let sink: Arc<dyn FailureSink> = match &self.failure_sink {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(FileFailureSink::open(&self.config.failures_path)?),
        };

        let handle = Arc::new(ConnectionHandle::connect(self.connector.as_ref(), &self.config).await?);

        let (queue, receiver) = PublishQueue::unbounded();
        let (interrupt, interrupt_rx) = watch::channel(false);
        let (done_tx, done) = oneshot::channel();

        let worker = PublisherWorker::new(receiver, handle.publisher(), sink, interrupt_rx)
            .poll_interval(self.config.poll_interval)
            .write_timeout(self.config.write_timeout);
        let worker = tokio::spawn(worker.run(done_tx));

        Ok(Connection {
            handle,
            queue: Arc::new(queue),
            interrupt,
            done,
            worker,
        })
    }

    /// Whether the gateway is connected and its session is up
    ///
    /// Never fails; false before `connect`, while draining and after close.
    pub fn is_connected(&self) -> bool {
        match &*self.lifecycle.lock() {
            Lifecycle::Connected(connection) => connection.handle.is_connected(),
            _ => false,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        match &*self.lifecycle.lock() {
            Lifecycle::Created | Lifecycle::Connecting => LifecycleState::Created,
            Lifecycle::Connected(_) => LifecycleState::Connected,
            Lifecycle::Draining { .. } => LifecycleState::Draining,
            Lifecycle::Closed => LifecycleState::Closed,
        }
    }

    /// Queue `message` for `topic` and return immediately
    ///
    /// Serialization happens later on the worker. Broker failures are never
    /// reported here; they end up in the failure sink.
    ///
    /// # Errors
    ///
    /// * `NotConnected` - before `connect`, after close, or while the
    ///   session is down
    /// * `ShuttingDown` - shutdown (or a worker interrupt) has begun
    pub fn publish<T>(&self, topic: &str, message: T) -> Result<()>
    where
        T: Serialize + Send + 'static,
    {
        let queue = {
            let lifecycle = self.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Connected(connection) => {
                    if !connection.handle.is_connected() {
                        return Err(GatewayError::NotConnected);
                    }
                    Arc::clone(&connection.queue)
                }
                Lifecycle::Draining { .. } => {
                    warn!(topic = %topic, "Shutdown initiated, rejecting publish");
                    return Err(GatewayError::ShuttingDown);
                }
                _ => return Err(GatewayError::NotConnected),
            }
        };

        queue.enqueue(PublishTask::new(topic, message)).inspect_err(|_| {
            warn!(topic = %topic, "Publisher not accepting tasks, rejecting publish");
        })
    }

    /// Subscribe `consumer` to `topic`, decoding messages as `T`
    ///
    /// The durable name is `<topic>-<client_id>`. A second subscribe on the
    /// same topic is a no-op and keeps the first consumer.
    ///
    /// # Errors
    ///
    /// * `NotConnected` - the gateway is not in `Connected` or its session is down
    /// * `Subscribe` - the broker refused the subscription
    pub async fn subscribe<T, C>(&self, topic: &str, consumer: C) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        C: MessageConsumer<T>,
    {
        let handle = {
            let lifecycle = self.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Connected(connection) if connection.handle.is_connected() => {
                    Arc::clone(&connection.handle)
                }
                _ => return Err(GatewayError::NotConnected),
            }
        };

        let durable_name = self.config.durable_name(topic);
        self.subscriptions
            .subscribe::<T, C>(handle.subscriber().as_ref(), topic, &durable_name, consumer)
            .await
            .map(|_| ())
    }

    /// Active subscriptions, sorted by topic
    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.list().await
    }

    /// Tasks accepted but not yet taken by the worker
    pub fn pending_publishes(&self) -> usize {
        match &*self.lifecycle.lock() {
            Lifecycle::Connected(connection) => connection.queue.len(),
            Lifecycle::Draining { queue, .. } => queue.len(),
            _ => 0,
        }
    }

    /// Interrupt the publisher worker
    ///
    /// The worker finishes the task in flight, stops accepting new ones,
    /// drains what is queued and closes its session. Publishes made after it
    /// noticed the interrupt fail with `ShuttingDown`. `shutdown` is still
    /// needed to close the gateway.
    pub fn interrupt_publisher(&self) -> Result<()> {
        match &*self.lifecycle.lock() {
            Lifecycle::Connected(connection) => {
                connection.interrupt.send_replace(true);
                info!("Publisher worker interrupt requested");
                Ok(())
            }
            _ => Err(GatewayError::NotConnected),
        }
    }

    /// Drain the publish queue, then close the sessions
    ///
    /// Stops accepting publishes, waits until the worker has brought every
    /// queued task to a terminal state and closed the publisher session,
    /// then closes the subscriber session. There is no timeout on the wait.
    ///
    /// The drain and close run on their own task: dropping the returned
    /// future (e.g. under `tokio::time::timeout`) does not stop the gateway
    /// from reaching `Closed`.
    ///
    /// # Errors
    ///
    /// * `NotConnected` - not in `Connected`; this includes a second or
    ///   concurrent call
    /// * `ShutdownFailed` - the close task panicked
    pub async fn shutdown(&self) -> Result<DrainReport> {
        let connection = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
                Lifecycle::Connected(connection) => {
                    *lifecycle = Lifecycle::Draining {
                        handle: Arc::clone(&connection.handle),
                        queue: Arc::clone(&connection.queue),
                    };
                    connection
                }
                other => {
                    *lifecycle = other;
                    return Err(GatewayError::NotConnected);
                }
            }
        };

        info!(
            pending = connection.queue.len(),
            "Shutting down gateway, draining publish queue"
        );
        connection.queue.close();

        let closing = tokio::spawn(close_connection(
            connection,
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.lifecycle),
        ));
        closing.await.map_err(|e| {
            error!(error = %e, "Gateway close task failed");
            GatewayError::ShutdownFailed(e.to_string())
        })
    }
}

/// Wait for the worker to drain, then close subscriptions and the subscriber
/// session and move to `Closed`
async fn close_connection(
    connection: Connection,
    subscriptions: Arc<SubscriptionRegistry>,
    lifecycle: Arc<Mutex<Lifecycle>>,
) -> DrainReport {
    let Connection {
        handle,
        queue: _queue,
        interrupt: _interrupt,
        done,
        worker,
    } = connection;

    let report = match done.await {
        Ok(report) => report,
        Err(_) => {
            error!("Publisher worker stopped without a drain report");
            DrainReport::default()
        }
    };
    if let Err(e) = worker.await {
        error!(error = %e, "Publisher worker task failed");
    }

    let subscriptions = subscriptions.close().await;
    if let Err(e) = handle.close_subscriber().await {
        error!(error = %e, "Error closing subscriber session");
    }

    *lifecycle.lock() = Lifecycle::Closed;
    info!(
        sent = report.sent,
        failed = report.failed,
        unrecorded = report.unrecorded,
        dropped = report.dropped,
        subscriptions,
        "Gateway closed"
    );
    report
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("protocol", &self.connector.protocol())
            .field("client_id", &self.config.client_id)
            .field("state", &self.state())
            .finish()
    }
}
