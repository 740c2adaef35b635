use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

/// Outcome counters of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Processed,
    Invalid,
    BatchOk,
    BatchFail,
    ItemOk,
    ItemFail,
    Requeued,
    DeadLettered,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub invalid: u64,
    pub batch_ok: u64,
    pub batch_fail: u64,
    pub item_ok: u64,
    pub item_fail: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

impl MetricsSnapshot {
    fn slot(&mut self, counter: Counter) -> &mut u64 {
        match counter {
            Counter::Processed => &mut self.processed,
            Counter::Invalid => &mut self.invalid,
            Counter::BatchOk => &mut self.batch_ok,
            Counter::BatchFail => &mut self.batch_fail,
            Counter::ItemOk => &mut self.item_ok,
            Counter::ItemFail => &mut self.item_fail,
            Counter::Requeued => &mut self.requeued,
            Counter::DeadLettered => &mut self.dead_lettered,
        }
    }
}

/// Monotonic counters shared by every task of the worker.
///
/// Purely observational: nothing branches on these values.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    counters: Mutex<MetricsSnapshot>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, counter: Counter) {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        let slot = counters.slot(counter);
        *slot = slot.saturating_add(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.counters.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Emit one structured log line with every counter
    pub fn log(&self, label: &str) {
        let s = self.snapshot();
        info!(
            label,
            processed = s.processed,
            invalid = s.invalid,
            batch_ok = s.batch_ok,
            batch_fail = s.batch_fail,
            item_ok = s.item_ok,
            item_fail = s.item_fail,
            requeued = s.requeued,
            dead_lettered = s.dead_lettered,
            "lead worker metrics"
        );
    }
}
