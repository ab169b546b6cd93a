//! Inbound message envelope
//!
//! What a broker adapter hands to a subscription handler. The payload is
//! kept as raw `Bytes`; decoding is the gateway's job.

use bytes::Bytes;
use std::sync::Arc;

/// A message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic (subject) the message was published on
    pub topic: String,
    /// Raw payload bytes, as written by the publisher
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Callback invoked by an adapter for every message on a subscription
///
/// Runs on the adapter's dispatch task, shared with other subscriptions of
/// the same session. It must not block for long.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;
