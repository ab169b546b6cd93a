//! Publish queue with a shutdown barrier
//!
//! An unbounded MPSC channel plus a flag. Enqueue checks the flag and sends
//! under a read lock; `close` sets the flag and drops the sender under the
//! write lock. Once `close` returns, no task can be appended, so the worker
//! only has to drain what is already buffered.

use super::PublishTask;
use crate::error::{GatewayError, Result};
use crate::metrics::Metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Producer side of the publish queue, shared by every caller
pub struct PublishQueue {
    tx: RwLock<Option<mpsc::UnboundedSender<PublishTask>>>,
    shutdown: Arc<AtomicBool>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side, owned by the publisher worker
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<PublishTask>,
    shutdown: Arc<AtomicBool>,
    depth: Arc<AtomicUsize>,
}

/// Result of one bounded wait on the queue
#[derive(Debug)]
pub enum Poll {
    /// Next task in submission order
    Task(PublishTask),
    /// Nothing arrived within the timeout
    Idle,
    /// Queue is closed and empty
    Drained,
}

impl PublishQueue {
    /// Create a connected producer/consumer pair
    pub fn unbounded() -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let depth = Arc::new(AtomicUsize::new(0));

        let queue = Self {
            tx: RwLock::new(Some(tx)),
            shutdown: Arc::clone(&shutdown),
            depth: Arc::clone(&depth),
        };
        let receiver = QueueReceiver {
            rx,
            shutdown,
            depth,
        };
        (queue, receiver)
    }

    /// Append a task without waiting
    ///
    /// Fails with `ShuttingDown` once `close` was called or the worker
    /// stopped accepting tasks.
    pub fn enqueue(&self, task: PublishTask) -> Result<()> {
        let guard = self.tx.read();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(GatewayError::ShuttingDown);
        }
        let Some(tx) = guard.as_ref() else {
            return Err(GatewayError::ShuttingDown);
        };
        if tx.is_closed() {
            return Err(GatewayError::ShuttingDown);
        }

        let metrics = Metrics::get();
        let topic = metrics.map(|_| task.topic.clone());

        // Counted before the send so the worker never sees a buffered task at depth 0
        self.depth.fetch_add(1, Ordering::AcqRel);
        if let Some(metrics) = metrics {
            metrics.record_enqueued();
        }

        if tx.send(task).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            if let Some(metrics) = metrics {
                metrics.record_dequeued();
            }
            return Err(GatewayError::ShuttingDown);
        }

        if let (Some(metrics), Some(topic)) = (metrics, topic) {
            metrics.record_accepted(&topic);
        }
        Ok(())
    }

    /// Raise the shutdown barrier
    ///
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        let mut guard = self.tx.write();
        self.shutdown.store(true, Ordering::Release);
        guard.take().is_some()
    }

    /// Whether the barrier is up
    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Tasks accepted but not yet taken by the worker
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Check if no tasks are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueReceiver {
    /// Wait up to `timeout` for the next task
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Poll {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(task)) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                if let Some(metrics) = Metrics::get() {
                    metrics.record_dequeued();
                }
                Poll::Task(task)
            }
            Ok(None) => Poll::Drained,
            Err(_) => Poll::Idle,
        }
    }

    /// Stop accepting new tasks; buffered tasks can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Whether the producer side raised the shutdown barrier
    pub fn shutdown_initiated(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Tasks still buffered
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
