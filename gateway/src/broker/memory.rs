//! In-memory broker
//!
//! A process-local broker used by tests, demos and local development. It
//! emulates the three publish protocols through [`PublishMode`] and exposes
//! knobs to make the broker unreachable, drop the connection, slow writes
//! down or fail them.
//!
//! Every durable subscription gets its own dispatch task fed by an unbounded
//! channel, so handlers never run on the task that called `write`.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pubgate_core::{
    BrokerConnector, BrokerError, BrokerSession, InboundMessage, MessageHandler, SessionOptions,
    SessionStatus, SubscriptionHandle,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// What a write waits for before it counts as done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Done once the broker took the message; no ack
    #[default]
    FireAndForget,
    /// Done when the broker acks; a slow or lost ack is a timeout
    Acknowledged {
        /// How long a write waits for its ack
        ack_timeout: Duration,
    },
    /// The broker acks with the stream that stored the message, or an error
    /// when no stream is bound to the subject
    StreamAcked,
}

impl PublishMode {
    fn protocol(self) -> &'static str {
        match self {
            PublishMode::FireAndForget => "memory",
            PublishMode::Acknowledged { .. } => "memory-acked",
            PublishMode::StreamAcked => "memory-stream",
        }
    }
}

struct Route {
    session_id: u64,
    topic: String,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct Inner {
    published: Vec<(String, Bytes)>,
    failing_topics: HashSet<String>,
    fail_next: usize,
    write_latency: Duration,
    streams: HashSet<String>,
    routes: Vec<Route>,
    durable_names: Vec<String>,
    opened: Vec<String>,
    closed: Vec<String>,
}

struct BrokerState {
    reachable: AtomicBool,
    connected: AtomicBool,
    next_id: AtomicU64,
    inner: Mutex<Inner>,
}

/// In-memory broker and its [`BrokerConnector`]
///
/// Clones share the same broker, so a test keeps one clone for inspection
/// and hands another to the gateway.
///
/// # Example
///
/// ```
/// use pubgate_gateway::broker::{MemoryBroker, PublishMode};
///
/// let broker = MemoryBroker::new(PublishMode::StreamAcked);
/// broker.bind_stream("orders.created");
/// broker.fail_next_writes(1);
/// assert!(broker.published().is_empty());
/// ```
#[derive(Clone)]
pub struct MemoryBroker {
    mode: PublishMode,
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(PublishMode::default())
    }
}

impl MemoryBroker {
    /// Create a reachable, connected broker
    pub fn new(mode: PublishMode) -> Self {
        Self {
            mode,
            state: Arc::new(BrokerState {
                reachable: AtomicBool::new(true),
                connected: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Publish protocol this broker emulates
    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    /// Whether new sessions can be opened
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drop or restore the connection of every session
    ///
    /// While disconnected, sessions report [`SessionStatus::Disconnected`]
    /// and writes fail.
    pub fn set_connected(&self, connected: bool) {
        self.state.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail every write to `topic` from now on
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.state.inner.lock().failing_topics.insert(topic.into());
    }

    /// Fail the next `count` writes, whatever their topic
    pub fn fail_next_writes(&self, count: usize) {
        self.state.inner.lock().fail_next = count;
    }

    /// Delay every write by `latency`
    pub fn set_write_latency(&self, latency: Duration) {
        self.state.inner.lock().write_latency = latency;
    }

    /// Bind `subject` to a stream (only matters for [`PublishMode::StreamAcked`])
    pub fn bind_stream(&self, subject: impl Into<String>) {
        self.state.inner.lock().streams.insert(subject.into());
    }

    /// Push raw bytes to every subscription on `topic`, as if another client
    /// published them; returns the number of subscriptions reached
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let inner = self.state.inner.lock();
        fan_out(&inner.routes, topic, &payload)
    }

    /// Every accepted write, in broker order
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.state.inner.lock().published.clone()
    }

    /// Durable names subscriptions were opened with, in order
    pub fn durable_names(&self) -> Vec<String> {
        self.state.inner.lock().durable_names.clone()
    }

    /// Client ids of opened sessions, in order
    pub fn opened_sessions(&self) -> Vec<String> {
        self.state.inner.lock().opened.clone()
    }

    /// Client ids of closed sessions, in order
    pub fn closed_sessions(&self) -> Vec<String> {
        self.state.inner.lock().closed.clone()
    }

    /// Live subscriptions across all sessions
    pub fn subscription_count(&self) -> usize {
        self.state.inner.lock().routes.len()
    }

    fn open(&self, options: &SessionOptions) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection(format!(
                "broker at {} is unreachable",
                options.url
            )));
        }
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.inner.lock().opened.push(options.client_id.clone());
        debug!(client_id = %options.client_id, url = %options.url, "Opened memory session");

        Ok(Arc::new(MemorySession {
            id,
            client_id: options.client_id.clone(),
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    fn protocol(&self) -> &'static str {
        self.mode.protocol()
    }

    async fn open_subscriber_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        self.open(options)
    }

    async fn open_publisher_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        self.open(options)
    }
}

fn fan_out(routes: &[Route], topic: &str, payload: &Bytes) -> usize {
    routes
        .iter()
        .filter(|route| route.topic == topic)
        .filter(|route| {
            route
                .tx
                .send(InboundMessage::new(topic, payload.clone()))
                .is_ok()
        })
        .count()
}

/// One session on a [`MemoryBroker`]
pub struct MemorySession {
    id: u64,
    client_id: String,
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl MemorySession {
    /// Client id the session was opened with
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn check_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    fn failure(&self, topic: &str) -> BrokerError {
        match self.broker.mode {
            PublishMode::FireAndForget => {
                BrokerError::Write(format!("broker dropped message on {topic}"))
            }
            PublishMode::Acknowledged { .. } => {
                BrokerError::Timeout(format!("no ack for message on {topic}"))
            }
            PublishMode::StreamAcked => {
                BrokerError::Rejected(format!("ack error for message on {topic}"))
            }
        }
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn status(&self) -> SessionStatus {
        if self.closed.load(Ordering::SeqCst) {
            SessionStatus::Closed
        } else if !self.broker.state.connected.load(Ordering::SeqCst) {
            SessionStatus::Disconnected
        } else {
            SessionStatus::Connected
        }
    }

    async fn write(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.check_open()?;

        let latency = self.broker.state.inner.lock().write_latency;
        if !latency.is_zero() {
            if let PublishMode::Acknowledged { ack_timeout } = self.broker.mode {
                if latency > ack_timeout {
                    tokio::time::sleep(ack_timeout).await;
                    return Err(BrokerError::Timeout(format!(
                        "no ack for message on {topic} within {ack_timeout:?}"
                    )));
                }
            }
            tokio::time::sleep(latency).await;
        }

        if !self.broker.state.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::Write("connection lost".to_string()));
        }

        let mut inner = self.broker.state.inner.lock();
        let injected = if inner.fail_next > 0 {
            inner.fail_next -= 1;
            true
        } else {
            inner.failing_topics.contains(topic)
        };
        if injected {
            return Err(self.failure(topic));
        }
        if self.broker.mode == PublishMode::StreamAcked && !inner.streams.contains(topic) {
            return Err(BrokerError::Rejected(format!(
                "no stream matches subject {topic}"
            )));
        }

        inner.published.push((topic.to_string(), payload.clone()));
        let reached = fan_out(&inner.routes, topic, &payload);
        trace!(topic = %topic, subscribers = reached, "Memory write accepted");
        Ok(())
    }

    async fn subscribe_durable(
        &self,
        topic: &str,
        durable_name: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, BrokerError> {
        self.check_open()?;
        if !self.broker.state.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscribe(format!(
                "cannot subscribe to {topic}: connection lost"
            )));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler(message);
            }
        });

        let subscription_id = self.broker.state.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.broker.state.inner.lock();
        inner.routes.push(Route {
            session_id: self.id,
            topic: topic.to_string(),
            tx,
        });
        inner.durable_names.push(durable_name.to_string());

        Ok(SubscriptionHandle {
            id: subscription_id,
            topic: topic.to_string(),
            durable_name: durable_name.to_string(),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut inner = self.broker.state.inner.lock();
        // Dropping the senders ends the dispatch tasks
        inner.routes.retain(|route| route.session_id != self.id);
        inner.closed.push(self.client_id.clone());
        debug!(client_id = %self.client_id, "Closed memory session");
        Ok(())
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
