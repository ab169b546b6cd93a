//! In-memory failure sink
//!
//! Bounded ring of failure records. When full, the oldest record is evicted
//! and counted in `total_dropped`.

use super::{FailureRecord, FailureSink};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory sink for failed publishes
pub struct MemoryFailureSink {
    records: Mutex<VecDeque<FailureRecord>>,
    capacity: usize,
    /// Metrics: total records ever captured
    total_captured: AtomicU64,
    /// Metrics: records evicted due to capacity
    total_dropped: AtomicU64,
}

impl MemoryFailureSink {
    /// Create a sink retaining at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            total_captured: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Remove and return up to `n` records, oldest first
    pub fn drain(&self, n: usize) -> Vec<FailureRecord> {
        let mut records = self.records.lock();
        let drain_count = n.min(records.len());
        records.drain(..drain_count).collect()
    }

    /// Look at up to `n` records without removing them
    pub fn peek(&self, n: usize) -> Vec<FailureRecord> {
        let records = self.records.lock();
        records.iter().take(n).cloned().collect()
    }

    /// Current number of retained records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if no records are retained
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Total records ever captured
    pub fn total_captured(&self) -> u64 {
        self.total_captured.load(Ordering::Relaxed)
    }

    /// Total records evicted due to capacity
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    /// Remove all retained records
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl FailureSink for MemoryFailureSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn record(
        &self,
        topic: &str,
        message: &str,
        timestamp: DateTime<Local>,
    ) -> std::io::Result<()> {
        let mut records = self.records.lock();
        if self.capacity == 0 {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            if records.len() >= self.capacity {
                records.pop_front();
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
            }
            records.push_back(FailureRecord::new(topic, message, timestamp));
        }
        self.total_captured.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
