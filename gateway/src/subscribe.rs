//! Subscription registry and dispatcher
//!
//! At most one subscription (and one consumer) per topic per gateway. A
//! second `subscribe` on a topic leaves the first one untouched.
//!
//! Inbound bytes are decoded on the broker's dispatch task. Undecodable
//! messages are logged with their raw payload and never reach the consumer.

use crate::codec::{self, DecodeError};
use crate::error::{GatewayError, Result};
use crate::metrics::Metrics;
use pubgate_core::{BrokerSession, InboundMessage, MessageHandler, SubscriptionHandle};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Receives decoded messages for one topic
///
/// Called on the broker's dispatch task, which other topics share; it must
/// not block indefinitely. Implemented for any `Fn(T) + Send + Sync`.
pub trait MessageConsumer<T>: Send + Sync + 'static {
    /// Handle one decoded message
    fn on_message(&self, message: T);
}

impl<T, F> MessageConsumer<T> for F
where
    F: Fn(T) + Send + Sync + 'static,
{
    fn on_message(&self, message: T) {
        self(message)
    }
}

/// Per-subscription delivery counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    malformed: AtomicU64,
}

impl DispatchStats {
    /// Messages handed to the consumer
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages dropped as undecodable
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// Decodes inbound payloads into `T` and forwards them to a consumer
pub struct Dispatcher<T, C> {
    topic: String,
    consumer: C,
    stats: Arc<DispatchStats>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, C> Dispatcher<T, C>
where
    T: DeserializeOwned,
    C: MessageConsumer<T>,
{
    /// Create a dispatcher for `topic`
    pub fn new(topic: impl Into<String>, consumer: C, stats: Arc<DispatchStats>) -> Self {
        Self {
            topic: topic.into(),
            consumer,
            stats,
            _payload: PhantomData,
        }
    }

    /// Decode `message` and invoke the consumer, or log and drop it
    pub fn dispatch(&self, message: InboundMessage) {
        match codec::decode::<T>(&message.payload) {
            Ok(decoded) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = Metrics::get() {
                    metrics.record_received(&self.topic);
                }
                self.consumer.on_message(decoded);
            }
            Err(e) => self.reject(&message, e),
        }
    }

    fn reject(&self, message: &InboundMessage, e: DecodeError) {
        self.stats.malformed.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = Metrics::get() {
            metrics.record_malformed(&self.topic);
        }
        let err = GatewayError::Deserialization {
            topic: self.topic.clone(),
            message: e.to_string(),
        };
        error!(
            topic = %self.topic,
            payload_type = std::any::type_name::<T>(),
            payload = %String::from_utf8_lossy(&message.payload),
            error = %err,
            "Error deserializing message"
        );
    }
}

/// Snapshot of one active subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Subscribed topic
    pub topic: String,
    /// Broker-side durable name
    pub durable_name: String,
    /// Rust type messages are decoded into
    pub payload_type: &'static str,
    /// Messages delivered to the consumer so far
    pub delivered: u64,
    /// Messages dropped as undecodable so far
    pub malformed: u64,
}

struct SubscriptionEntry {
    handle: SubscriptionHandle,
    payload_type: &'static str,
    stats: Arc<DispatchStats>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, SubscriptionEntry>,
    closed: bool,
}

/// Topic -> active subscription
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `consumer` to `topic` unless the topic already has one
    ///
    /// Returns `Ok(false)` when the topic was already subscribed; the
    /// existing subscription and consumer are kept. Fails with
    /// `NotConnected` once the registry was closed.
    pub async fn subscribe<T, C>(
        &self,
        session: &dyn BrokerSession,
        topic: &str,
        durable_name: &str,
        consumer: C,
    ) -> Result<bool>
    where
        T: DeserializeOwned + 'static,
        C: MessageConsumer<T>,
    {
        // Held across the broker call so two racing subscribes cannot both register
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(GatewayError::NotConnected);
        }
        if state.entries.contains_key(topic) {
            debug!(topic = %topic, "Already subscribed, keeping existing consumer");
            return Ok(false);
        }

        let stats = Arc::new(DispatchStats::default());
        let dispatcher = Arc::new(Dispatcher::<T, C>::new(topic, consumer, Arc::clone(&stats)));
        let handler: MessageHandler = Arc::new(move |message| dispatcher.dispatch(message));

        let handle = session
            .subscribe_durable(topic, durable_name, handler)
            .await
            .map_err(|source| GatewayError::Subscribe {
                topic: topic.to_string(),
                source,
            })?;

        info!(
            topic = %topic,
            durable_name = %handle.durable_name,
            payload_type = std::any::type_name::<T>(),
            "Subscribed"
        );

        state.entries.insert(
            topic.to_string(),
            SubscriptionEntry {
                handle,
                payload_type: std::any::type_name::<T>(),
                stats,
            },
        );
        if let Some(metrics) = Metrics::get() {
            metrics.set_subscriptions(state.entries.len());
        }
        Ok(true)
    }

    /// Snapshot of all subscriptions, sorted by topic
    pub async fn list(&self) -> Vec<SubscriptionInfo> {
        let state = self.state.lock().await;
        let mut infos: Vec<SubscriptionInfo> = state
            .entries
            .iter()
            .map(|(topic, entry)| SubscriptionInfo {
                topic: topic.clone(),
                durable_name: entry.handle.durable_name.clone(),
                payload_type: entry.payload_type,
                delivered: entry.stats.delivered(),
                malformed: entry.stats.malformed(),
            })
            .collect();
        infos.sort_by(|a, b| a.topic.cmp(&b.topic));
        infos
    }

    /// Number of active subscriptions
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Forget every subscription and refuse new ones; returns how many
    /// there were
    pub async fn close(&self) -> usize {
        let mut state = self.state.lock().await;
        state.closed = true;
        let count = state.entries.len();
        state.entries.clear();
        if let Some(metrics) = Metrics::get() {
            metrics.set_subscriptions(0);
        }
        count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pubgate_core::{BrokerError, SessionStatus};
    use serde::Deserialize;
    use std::result::Result;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Request {
        request_id: String,
        samples: u32,
    }

    /// Session that keeps handlers so tests can deliver by hand
    #[derive(Default)]
    struct CapturingSession {
        handlers: parking_lot::Mutex<Vec<(String, String, MessageHandler)>>,
        refuse: bool,
    }

    impl CapturingSession {
        fn deliver(&self, topic: &str, payload: &'static [u8]) {
            let handlers: Vec<MessageHandler> = self
                .handlers
                .lock()
                .iter()
                .filter(|(t, _, _)| t == topic)
                .map(|(_, _, h)| Arc::clone(h))
                .collect();
            for handler in handlers {
                handler(InboundMessage::new(topic, Bytes::from_static(payload)));
            }
        }
    }

    #[async_trait]
    impl BrokerSession for CapturingSession {
        fn name(&self) -> &'static str {
            "capturing"
        }
        fn status(&self) -> SessionStatus {
            SessionStatus::Connected
        }
        async fn write(&self, _topic: &str, _payload: Bytes) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn subscribe_durable(
            &self,
            topic: &str,
            durable_name: &str,
            handler: MessageHandler,
        ) -> Result<SubscriptionHandle, BrokerError> {
            if self.refuse {
                return Err(BrokerError::Subscribe("not authorized".into()));
            }
            let mut handlers = self.handlers.lock();
            handlers.push((topic.to_string(), durable_name.to_string(), handler));
            Ok(SubscriptionHandle {
                id: handlers.len() as u64,
                topic: topic.to_string(),
                durable_name: durable_name.to_string(),
            })
        }
        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn collector() -> (
        Arc<parking_lot::Mutex<Vec<Request>>>,
        impl Fn(Request) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |req: Request| sink.lock().push(req))
    }

    #[tokio::test]
    async fn test_second_subscribe_is_noop() {
        let session = CapturingSession::default();
        let registry = SubscriptionRegistry::new();
        let (first, consumer_a) = collector();
        let (second, consumer_b) = collector();

        assert!(
            registry
                .subscribe::<Request, _>(&session, "topic.B", "topic.B-gw", consumer_a)
                .await
                .unwrap()
        );
        assert!(
            !registry
                .subscribe::<Request, _>(&session, "topic.B", "topic.B-gw", consumer_b)
                .await
                .unwrap()
        );

        assert_eq!(registry.len().await, 1);
        assert_eq!(session.handlers.lock().len(), 1);

        session.deliver("topic.B", br#"{"request_id":"R1","samples":3}"#);
        assert_eq!(first.lock().len(), 1);
        assert!(second.lock().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_not_delivered() {
        let session = CapturingSession::default();
        let registry = SubscriptionRegistry::new();
        let (seen, consumer) = collector();

        registry
            .subscribe::<Request, _>(&session, "topic.B", "topic.B-gw", consumer)
            .await
            .unwrap();

        session.deliver("topic.B", b"{not json");
        session.deliver("topic.B", br#"{"request_id":"R1"}"#);
        session.deliver("topic.B", &[0xc3, 0x28]);
        session.deliver("topic.B", br#"{"request_id":"R2","samples":7}"#);

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![Request {
                request_id: "R2".into(),
                samples: 7
            }]
        );

        let info = registry.list().await;
        assert_eq!(info[0].delivered, 1);
        assert_eq!(info[0].malformed, 3);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_not_registered() {
        let session = CapturingSession {
            refuse: true,
            ..Default::default()
        };
        let registry = SubscriptionRegistry::new();
        let (_seen, consumer) = collector();

        let result = registry
            .subscribe::<Request, _>(&session, "topic.B", "topic.B-gw", consumer)
            .await;

        assert!(matches!(result, Err(GatewayError::Subscribe { .. })));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_list_and_close() {
        let session = CapturingSession::default();
        let registry = SubscriptionRegistry::new();

        for topic in ["z.topic", "a.topic"] {
            let (_seen, consumer) = collector();
            registry
                .subscribe::<Request, _>(&session, topic, &format!("{topic}-gw"), consumer)
                .await
                .unwrap();
        }

        let infos = registry.list().await;
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].topic, "a.topic");
        assert_eq!(infos[0].durable_name, "a.topic-gw");
        assert!(infos[0].payload_type.ends_with("Request"));

        assert_eq!(registry.close().await, 2);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_after_close_is_refused() {
        let session = CapturingSession::default();
        let registry = SubscriptionRegistry::new();
        registry.close().await;

        let (_seen, consumer) = collector();
        let result = registry
            .subscribe::<Request, _>(&session, "topic.B", "topic.B-gw", consumer)
            .await;

        assert!(matches!(result, Err(GatewayError::NotConnected)));
        assert!(session.handlers.lock().is_empty());
        assert!(registry.list().await.is_empty());
    }
}
