//! Prometheus metrics for pubgate
//!
//! Metrics are process-global and optional: the pipeline calls
//! [`Metrics::get`] and skips recording when nobody initialised them.

use crate::error::{GatewayError, Result};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_histogram,
};
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All pubgate metrics
pub struct Metrics {
    // ─────────────────────────────────────────────────────────────────────────
    // Publish path
    // ─────────────────────────────────────────────────────────────────────────
    /// Publishes accepted into the queue (by topic)
    pub publishes_accepted: CounterVec,

    /// Publishes written to the broker (by topic)
    pub publishes_sent: CounterVec,

    /// Publishes the broker did not take (by topic)
    pub publishes_failed: CounterVec,

    /// Publishes that were neither sent nor failure-recorded (by reason)
    pub publishes_dropped: CounterVec,

    /// Failure sink writes that themselves failed
    pub failure_sink_errors: Counter,

    /// Tasks waiting in the publish queue
    pub publish_queue_depth: Gauge,

    /// Broker write duration in seconds
    pub publish_write_duration_seconds: Histogram,

    // ─────────────────────────────────────────────────────────────────────────
    // Subscribe path
    // ─────────────────────────────────────────────────────────────────────────
    /// Inbound messages delivered to a consumer (by topic)
    pub messages_received: CounterVec,

    /// Inbound messages dropped as undecodable (by topic)
    pub messages_malformed: CounterVec,

    /// Active subscriptions
    pub subscriptions_active: Gauge,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            publishes_accepted: register_counter_vec!(
                "pubgate_publishes_accepted_total",
                "Publish requests accepted into the queue",
                &["topic"]
            )
            .map_err(|e| GatewayError::Metrics(format!("publishes_accepted: {e}")))?,

            publishes_sent: register_counter_vec!(
                "pubgate_publishes_sent_total",
                "Messages written to the broker",
                &["topic"]
            )
            .map_err(|e| GatewayError::Metrics(format!("publishes_sent: {e}")))?,

            publishes_failed: register_counter_vec!(
                "pubgate_publishes_failed_total",
                "Messages the broker did not take (recorded to the failure sink)",
                &["topic"]
            )
            .map_err(|e| GatewayError::Metrics(format!("publishes_failed: {e}")))?,

            publishes_dropped: register_counter_vec!(
                "pubgate_publishes_dropped_total",
                "Messages neither sent nor recorded",
                &["reason"]
            )
            .map_err(|e| GatewayError::Metrics(format!("publishes_dropped: {e}")))?,

            failure_sink_errors: register_counter!(
                "pubgate_failure_sink_errors_total",
                "Failure sink writes that failed"
            )
            .map_err(|e| GatewayError::Metrics(format!("failure_sink_errors: {e}")))?,

            publish_queue_depth: register_gauge!(
                "pubgate_publish_queue_depth",
                "Tasks waiting in the publish queue"
            )
            .map_err(|e| GatewayError::Metrics(format!("publish_queue_depth: {e}")))?,

            publish_write_duration_seconds: register_histogram!(
                "pubgate_publish_write_duration_seconds",
                "Time spent in a single broker write",
                // Buckets: 100us to 10s
                vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
            )
            .map_err(|e| GatewayError::Metrics(format!("publish_write_duration: {e}")))?,

            messages_received: register_counter_vec!(
                "pubgate_messages_received_total",
                "Inbound messages delivered to a consumer",
                &["topic"]
            )
            .map_err(|e| GatewayError::Metrics(format!("messages_received: {e}")))?,

            messages_malformed: register_counter_vec!(
                "pubgate_messages_malformed_total",
                "Inbound messages dropped because they could not be decoded",
                &["topic"]
            )
            .map_err(|e| GatewayError::Metrics(format!("messages_malformed: {e}")))?,

            subscriptions_active: register_gauge!(
                "pubgate_subscriptions_active",
                "Active durable subscriptions"
            )
            .map_err(|e| GatewayError::Metrics(format!("subscriptions_active: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| GatewayError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Record a task about to be handed to the queue
    pub fn record_enqueued(&self) {
        self.publish_queue_depth.inc();
    }

    /// Record a publish the queue accepted
    pub fn record_accepted(&self, topic: &str) {
        self.publishes_accepted.with_label_values(&[topic]).inc();
    }

    /// Record a task taken off the queue
    pub fn record_dequeued(&self) {
        self.publish_queue_depth.dec();
    }

    /// Record the outcome of one broker write
    pub fn record_write(&self, topic: &str, duration: Duration, success: bool) {
        self.publish_write_duration_seconds
            .observe(duration.as_secs_f64());
        if success {
            self.publishes_sent.with_label_values(&[topic]).inc();
        } else {
            self.publishes_failed.with_label_values(&[topic]).inc();
        }
    }

    /// Record publishes dropped for `reason`
    pub fn record_dropped(&self, reason: &str, count: u64) {
        self.publishes_dropped
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }

    /// Record a failure sink error
    pub fn record_sink_error(&self) {
        self.failure_sink_errors.inc();
    }

    /// Record an inbound message delivered to its consumer
    pub fn record_received(&self, topic: &str) {
        self.messages_received.with_label_values(&[topic]).inc();
    }

    /// Record an inbound message dropped as malformed
    pub fn record_malformed(&self, topic: &str) {
        self.messages_malformed.with_label_values(&[topic]).inc();
    }

    /// Update the active subscription count
    pub fn set_subscriptions(&self, count: usize) {
        self.subscriptions_active.set(count as f64);
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}
