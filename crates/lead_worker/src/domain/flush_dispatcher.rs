use crate::domain::{
    Backpressure, BatchEntry, ContactStore, ContactStoreError, Counter, DeadLetterPublisher,
    DeadLetterReason, Lead, WorkerMetrics,
};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Timeouts and pauses used while dispatching batches
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Per-attempt timeout of a batch request
    pub batch_timeout: Duration,
    /// Per-attempt timeout of a single-lead request
    pub per_item_timeout: Duration,
    /// Consumption pause after a transient batch failure
    pub backpressure: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_secs(15),
            per_item_timeout: Duration::from_secs(10),
            backpressure: Duration::from_secs(10),
        }
    }
}

/// What triggered a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Timeout,
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushReason::Size => "size",
            FlushReason::Timeout => "timeout",
            FlushReason::Shutdown => "shutdown",
        })
    }
}

/// Turns a drained batch into contact store calls and settles every entry.
///
/// | outcome            | action                                   |
/// |--------------------|------------------------------------------|
/// | 2xx                | ack all                                  |
/// | 409 / 422          | per-item delivery                        |
/// | 413                | halve and flush each half                |
/// | transient, network | requeue all, engage backpressure         |
/// | anything else      | dead-letter and reject all               |
pub struct FlushDispatcher {
    store: Arc<dyn ContactStore>,
    dead_letters: DeadLetterPublisher,
    metrics: Arc<WorkerMetrics>,
    backpressure: Arc<Backpressure>,
    config: DispatcherConfig,
}

impl FlushDispatcher {
    pub fn new(
        store: Arc<dyn ContactStore>,
        dead_letters: DeadLetterPublisher,
        metrics: Arc<WorkerMetrics>,
        backpressure: Arc<Backpressure>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            dead_letters,
            metrics,
            backpressure,
            config,
        }
    }

    #[instrument(skip(self, batch), fields(batch_size = batch.len(), reason = %reason))]
    pub async fn flush(&self, batch: Vec<BatchEntry>, reason: FlushReason) {
        if batch.is_empty() {
            return;
        }
        info!(batch_size = batch.len(), reason = %reason, "flushing lead batch");
        self.flush_entries(batch).await;
    }

    fn flush_entries(&self, batch: Vec<BatchEntry>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let leads: Vec<Lead> = batch.iter().map(|entry| entry.lead.clone()).collect();
            let size = batch.len();

            match self
                .store
                .post_contacts(&leads, self.config.batch_timeout)
                .await
            {
                Ok(()) => {
                    for entry in &batch {
                        ack(entry).await;
                    }
                    self.metrics.inc(Counter::BatchOk);
                    info!(batch_size = size, "lead batch accepted");
                }
                Err(e @ ContactStoreError::Conflict { .. })
                | Err(e @ ContactStoreError::Validation { .. }) => {
                    warn!(batch_size = size, error = %e, "batch refused, falling back to per-item delivery");
                    self.deliver_individually(batch).await;
                }
                Err(ContactStoreError::PayloadTooLarge) => {
                    warn!(batch_size = size, "batch too large, splitting");
                    self.split_and_flush(batch).await;
                }
                Err(e) if e.is_transient() => {
                    for entry in &batch {
                        nack(entry, true).await;
                    }
                    // Counted as one failed batch; requeued tracks per-item retries
                    self.metrics.inc(Counter::BatchFail);
                    self.backpressure.engage(self.config.backpressure);
                    warn!(
                        batch_size = size,
                        error = %e,
                        pause_secs = self.config.backpressure.as_secs_f64(),
                        "transient batch failure, requeued all leads"
                    );
                }
                Err(e) => {
                    error!(batch_size = size, error = %e, "fatal batch failure, dead-lettering all leads");
                    for entry in &batch {
                        self.dead_letters
                            .publish(&entry.lead, DeadLetterReason::BatchFatal, e.status())
                            .await;
                        nack(entry, false).await;
                    }
                    self.metrics.inc(Counter::BatchFail);
                }
            }
        })
    }

    async fn split_and_flush(&self, mut batch: Vec<BatchEntry>) {
        if batch.len() <= 1 {
            self.deliver_individually(batch).await;
            return;
        }

        let right = batch.split_off(batch.len() / 2);
        debug!(left = batch.len(), right = right.len(), "split lead batch");

        self.flush_entries(batch).await;
        self.flush_entries(right).await;
    }

    async fn deliver_individually(&self, batch: Vec<BatchEntry>) {
        for entry in batch {
            let result = self
                .store
                .post_contacts(std::slice::from_ref(&entry.lead), self.config.per_item_timeout)
                .await;

            match result {
                Ok(()) => {
                    ack(&entry).await;
                    self.metrics.inc(Counter::ItemOk);
                }
                Err(e) if e.is_transient() => {
                    warn!(email = %entry.lead.email, error = %e, "transient failure for lead, requeueing");
                    nack(&entry, true).await;
                    self.metrics.inc(Counter::Requeued);
                }
                Err(e) => {
                    error!(email = %entry.lead.email, error = %e, "lead refused by contact store");
                    self.dead_letters
                        .publish(&entry.lead, DeadLetterReason::ItemFailed, e.status())
                        .await;
                    nack(&entry, false).await;
                    self.metrics.inc(Counter::ItemFail);
                }
            }
        }
    }
}

pub(crate) async fn ack(entry: &BatchEntry) {
    if let Err(e) = entry.handle.ack().await {
        warn!(
            email = %entry.lead.email,
            epoch = entry.handle.epoch(),
            error = %format!("{:#}", e),
            "failed to acknowledge lead, broker will redeliver"
        );
    }
}

pub(crate) async fn nack(entry: &BatchEntry, requeue: bool) {
    if let Err(e) = entry.handle.nack(requeue).await {
        warn!(
            email = %entry.lead.email,
            epoch = entry.handle.epoch(),
            requeue,
            error = %format!("{:#}", e),
            "failed to reject lead, broker will redeliver"
        );
    }
}
