//! Publisher worker - the single task that performs broker writes

use super::queue::{Poll, QueueReceiver};
use super::{DrainReport, PublishTask};
use crate::error::GatewayError;
use crate::failure::FailureSink;
use crate::metrics::Metrics;
use bytes::Bytes;
use chrono::Local;
use pubgate_core::{BrokerError, BrokerSession};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Drains the publish queue into a dedicated broker session
///
/// Built with exactly the collaborators it needs: the consumer side of the
/// queue (which carries the shutdown flag), the publisher session, the
/// failure sink and the interrupt signal.
pub struct PublisherWorker {
    queue: QueueReceiver,
    session: Arc<dyn BrokerSession>,
    sink: Arc<dyn FailureSink>,
    interrupt: watch::Receiver<bool>,
    poll_interval: Duration,
    write_timeout: Option<Duration>,
    report: DrainReport,
}

impl PublisherWorker {
    /// Create a worker with a 100ms poll interval and no write timeout
    pub fn new(
        queue: QueueReceiver,
        session: Arc<dyn BrokerSession>,
        sink: Arc<dyn FailureSink>,
        interrupt: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            session,
            sink,
            interrupt,
            poll_interval: Duration::from_millis(100),
            write_timeout: None,
            report: DrainReport::default(),
        }
    }

    /// How long to wait on an empty queue before re-checking for shutdown
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound on a single broker write
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Run until shutdown (or interrupt) and the queue is empty
    ///
    /// This will:
    /// 1. Wait up to `poll_interval` for the next task
    /// 2. Serialize it; unserializable payloads are logged and dropped
    /// 3. Write it to the broker
    /// 4. Record failed writes in the failure sink
    /// 5. On interrupt, stop accepting tasks but keep draining
    /// 6. Exit once shutdown or interrupt was seen and the queue is empty
    /// 7. Close the publisher session, then send the drain report
    pub async fn run(mut self, done: oneshot::Sender<DrainReport>) {
        info!(
            session = self.session.name(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Publisher worker started"
        );

        let mut interrupted = false;
        loop {
            match self.queue.recv_timeout(self.poll_interval).await {
                Poll::Task(task) => self.process(task).await,
                Poll::Idle => {}
                Poll::Drained => break,
            }

            let interrupt_requested = *self.interrupt.borrow();
            if !interrupted && interrupt_requested {
                interrupted = true;
                warn!(
                    pending = self.queue.len(),
                    "Publisher worker interrupted, draining queue"
                );
                self.queue.close();
            }

            if (interrupted || self.queue.shutdown_initiated()) && self.queue.is_empty() {
                break;
            }
        }

        if let Err(e) = self.session.close().await {
            error!(error = %e, "Error closing publisher session");
        }

        info!(
            sent = self.report.sent,
            failed = self.report.failed,
            unrecorded = self.report.unrecorded,
            dropped = self.report.dropped,
            "Publisher worker stopped"
        );

        // Nobody waiting means the gateway was dropped without shutdown
        let _ = done.send(self.report);
    }

    /// Bring one task to a terminal state
    async fn process(&mut self, task: PublishTask) {
        let PublishTask {
            topic,
            payload,
            enqueued_at,
        } = task;

        let body = match payload.to_json() {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                let err = GatewayError::Serialization(e.to_string());
                error!(
                    topic = %topic,
                    payload_type = payload.type_name(),
                    error = %err,
                    "Error serializing publish payload, message dropped"
                );
                self.report.dropped += 1;
                if let Some(metrics) = Metrics::get() {
                    metrics.record_dropped("serialization", 1);
                }
                return;
            }
        };

        let write_start = Instant::now();
        let result = self.write(&topic, body.clone()).await;
        if let Some(metrics) = Metrics::get() {
            metrics.record_write(&topic, write_start.elapsed(), result.is_ok());
        }

        match result {
            Ok(()) => {
                self.report.sent += 1;
                debug!(
                    topic = %topic,
                    bytes = body.len(),
                    queued_ms = enqueued_at.elapsed().as_millis() as u64,
                    "Published"
                );
            }
            Err(source) => {
                let err = GatewayError::PublishWrite {
                    topic: topic.clone(),
                    source,
                };
                error!(topic = %topic, error = %err, "Error during attempt to publish");
                let message = String::from_utf8_lossy(&body);
                match self.sink.record(&topic, &message, Local::now()) {
                    Ok(()) => self.report.failed += 1,
                    Err(io) => {
                        self.report.unrecorded += 1;
                        error!(
                            topic = %topic,
                            sink = self.sink.name(),
                            error = %io,
                            message = %message,
                            "Error recording publish failure"
                        );
                        if let Some(metrics) = Metrics::get() {
                            metrics.record_sink_error();
                            metrics.record_dropped("failure_sink", 1);
                        }
                    }
                }
            }
        }
    }

    async fn write(&self, topic: &str, body: Bytes) -> Result<(), BrokerError> {
        match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.session.write(topic, body))
                .await
                .unwrap_or_else(|_| {
                    Err(BrokerError::Timeout(format!(
                        "write did not complete within {}ms",
                        limit.as_millis()
                    )))
                }),
            None => self.session.write(topic, body).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::failure::MemoryFailureSink;
    use crate::publish::PublishQueue;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pubgate_core::{MessageHandler, SessionStatus, SubscriptionHandle};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Session that records writes and fails topics listed in `failing`
    struct RecordingSession {
        written: Mutex<Vec<(String, Bytes)>>,
        failing: Vec<&'static str>,
        latency: Duration,
        closed: AtomicBool,
    }

    impl RecordingSession {
        fn new() -> Self {
            Self {
                written: Mutex::new(Vec::new()),
                failing: Vec::new(),
                latency: Duration::ZERO,
                closed: AtomicBool::new(false),
            }
        }

        fn failing(topics: Vec<&'static str>) -> Self {
            Self {
                failing: topics,
                ..Self::new()
            }
        }

        fn topics(&self) -> Vec<String> {
            self.written.lock().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl BrokerSession for RecordingSession {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn status(&self) -> SessionStatus {
            SessionStatus::Connected
        }
        async fn write(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.failing.contains(&topic) {
                return Err(BrokerError::Write("connection reset".into()));
            }
            self.written.lock().push((topic.to_string(), payload));
            Ok(())
        }
        async fn subscribe_durable(
            &self,
            topic: &str,
            durable_name: &str,
            _handler: MessageHandler,
        ) -> Result<SubscriptionHandle, BrokerError> {
            Ok(SubscriptionHandle {
                id: 1,
                topic: topic.to_string(),
                durable_name: durable_name.to_string(),
            })
        }
        async fn close(&self) -> Result<(), BrokerError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Sink whose writes always fail
    struct BrokenSink;

    impl FailureSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn record(
            &self,
            _topic: &str,
            _message: &str,
            _timestamp: chrono::DateTime<Local>,
        ) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    struct Harness {
        queue: PublishQueue,
        interrupt: watch::Sender<bool>,
        done: oneshot::Receiver<DrainReport>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_worker(
        session: Arc<dyn BrokerSession>,
        sink: Arc<dyn FailureSink>,
        write_timeout: Option<Duration>,
    ) -> Harness {
        let (queue, rx) = PublishQueue::unbounded();
        let (interrupt, interrupt_rx) = watch::channel(false);
        let (done_tx, done) = oneshot::channel();
        let worker = PublisherWorker::new(rx, session, sink, interrupt_rx)
            .poll_interval(Duration::from_millis(10))
            .write_timeout(write_timeout);
        let handle = tokio::spawn(worker.run(done_tx));
        Harness {
            queue,
            interrupt,
            done,
            handle,
        }
    }

    #[tokio::test]
    async fn test_writes_in_submission_order() {
        let session = Arc::new(RecordingSession::new());
        let sink = Arc::new(MemoryFailureSink::new(10));
        let h = spawn_worker(session.clone(), sink.clone(), None);

        let topics: Vec<String> = (0..20).map(|i| format!("topic.{}", i % 3)).collect();
        for (i, topic) in topics.iter().enumerate() {
            h.queue.enqueue(PublishTask::new(topic.clone(), json!({ "seq": i }))).unwrap();
        }
        h.queue.close();

        let report = h.done.await.unwrap();
        h.handle.await.unwrap();

        assert_eq!(report.sent, 20);
        assert_eq!(session.topics(), topics);
        let written = session.written.lock();
        for (i, (_, body)) in written.iter().enumerate() {
            let value: serde_json::Value = serde_json::from_slice(body).unwrap();
            assert_eq!(value["seq"], i);
        }
        assert!(sink.is_empty());
        assert!(session.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_write_is_recorded() {
        let session = Arc::new(RecordingSession::failing(vec!["topic.A"]));
        let sink = Arc::new(MemoryFailureSink::new(10));
        let h = spawn_worker(session.clone(), sink.clone(), None);

        h.queue.enqueue(PublishTask::new("topic.A", json!({"x": 1}))).unwrap();
        h.queue.enqueue(PublishTask::new("topic.B", json!({"x": 2}))).unwrap();
        h.queue.close();

        let report = h.done.await.unwrap();
        assert_eq!(report, DrainReport { sent: 1, failed: 1, unrecorded: 0, dropped: 0 });

        let records = sink.drain(10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "topic.A");
        assert!(records[0].message.contains(r#""x":1"#));
    }

    #[tokio::test]
    async fn test_unserializable_payload_is_dropped() {
        let session = Arc::new(RecordingSession::new());
        let sink = Arc::new(MemoryFailureSink::new(10));
        let h = spawn_worker(session.clone(), sink.clone(), None);

        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON");
        h.queue.enqueue(PublishTask::new("topic.bad", bad)).unwrap();
        h.queue.enqueue(PublishTask::new("topic.good", json!({"ok": true}))).unwrap();
        h.queue.close();

        let report = h.done.await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(session.topics(), vec!["topic.good"]);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_worker() {
        let session = Arc::new(RecordingSession::failing(vec!["topic.A"]));
        let h = spawn_worker(session.clone(), Arc::new(BrokenSink), None);

        h.queue.enqueue(PublishTask::new("topic.A", 1)).unwrap();
        h.queue.enqueue(PublishTask::new("topic.B", 2)).unwrap();
        h.queue.close();

        let report = h.done.await.unwrap();
        assert_eq!(report.unrecorded, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.total(), 2);
    }

    #[tokio::test]
    async fn test_slow_write_times_out_into_sink() {
        let session = Arc::new(RecordingSession {
            latency: Duration::from_millis(200),
            ..RecordingSession::new()
        });
        let sink = Arc::new(MemoryFailureSink::new(10));
        let h = spawn_worker(session.clone(), sink.clone(), Some(Duration::from_millis(20)));

        h.queue.enqueue(PublishTask::new("topic.slow", json!({"x": 1}))).unwrap();
        h.queue.close();

        let report = h.done.await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(sink.peek(1)[0].topic, "topic.slow");
    }

    #[tokio::test]
    async fn test_interrupt_drains_then_rejects() {
        let session = Arc::new(RecordingSession::new());
        let sink = Arc::new(MemoryFailureSink::new(10));
        let h = spawn_worker(session.clone(), sink.clone(), None);

        for i in 0..5 {
            h.queue.enqueue(PublishTask::new("topic.A", i)).unwrap();
        }
        h.interrupt.send(true).unwrap();

        let report = h.done.await.unwrap();
        assert_eq!(report.sent, 5);
        assert!(session.closed.load(Ordering::SeqCst));

        let late = h.queue.enqueue(PublishTask::new("topic.A", 6));
        assert!(matches!(late, Err(crate::GatewayError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_idle_worker_exits_on_shutdown() {
        let session = Arc::new(RecordingSession::new());
        let h = spawn_worker(session.clone(), Arc::new(MemoryFailureSink::new(1)), None);

        tokio::time::sleep(Duration::from_millis(30)).await;
        h.queue.close();

        let report = h.done.await.unwrap();
        assert_eq!(report.total(), 0);
        assert!(session.closed.load(Ordering::SeqCst));
    }
}
