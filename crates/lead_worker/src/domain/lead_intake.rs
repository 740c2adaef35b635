use crate::domain::flush_dispatcher::ack;
use crate::domain::{
    parse_lead, AddOutcome, BatchBuffer, BatchEntry, Counter, FlushDispatcher, FlushReason,
    WorkerMetrics,
};
use common::nats::{set_parent_from_headers, RawMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Entry point for delivered messages: validate, dedupe, buffer and flush.
pub struct LeadIntake {
    buffer: Arc<BatchBuffer>,
    dispatcher: Arc<FlushDispatcher>,
    metrics: Arc<WorkerMetrics>,
    finalized: AtomicBool,
}

impl LeadIntake {
    pub fn new(
        buffer: Arc<BatchBuffer>,
        dispatcher: Arc<FlushDispatcher>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            buffer,
            dispatcher,
            metrics,
            finalized: AtomicBool::new(false),
        }
    }

    #[instrument(skip(self, message), fields(subject = %message.subject, epoch = message.handle.epoch()))]
    pub async fn handle(&self, message: RawMessage) {
        let RawMessage {
            subject,
            payload,
            headers,
            handle,
        } = message;

        // Links the flush that settles this lead to the producer's trace
        if let Some(headers) = headers.as_ref() {
            set_parent_from_headers(headers);
        }

        let lead = match parse_lead(&payload) {
            Ok(lead) => lead,
            Err(invalid) => {
                self.metrics.inc(Counter::Invalid);
                warn!(
                    subject = %subject,
                    reason = invalid.reason(),
                    error = %invalid,
                    "discarding invalid lead"
                );
                if let Err(e) = handle.ack().await {
                    warn!(error = %format!("{:#}", e), "failed to acknowledge invalid lead");
                }
                return;
            }
        };

        self.metrics.inc(Counter::Processed);

        match self.buffer.add(BatchEntry { lead, handle }).await {
            AddOutcome::Duplicate(entry) => {
                debug!(email = %entry.lead.email, "duplicate lead in open batch, acknowledging");
                ack(&entry).await;
            }
            AddOutcome::Buffered { flush_due: true } => {
                self.flush(FlushReason::Size).await;
            }
            AddOutcome::Buffered { flush_due: false } => {}
        }
    }

    /// Flush if the open batch has been waiting for at least the timeout
    pub async fn flush_if_due(&self) -> bool {
        if !self.buffer.due_by_timeout().await {
            return false;
        }
        self.flush(FlushReason::Timeout).await
    }

    /// Flush whatever is buffered and log final metrics. Runs at most once.
    pub async fn final_flush(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            debug!("final flush already performed");
            return;
        }
        info!("performing final flush");
        self.flush(FlushReason::Shutdown).await;
        self.metrics.log("final");
    }

    /// Drop buffered entries that belong to an earlier connection epoch
    pub async fn discard_stale(&self, current_epoch: u64) -> usize {
        let discarded = self.buffer.discard_stale(current_epoch).await;
        if discarded > 0 {
            warn!(
                discarded,
                current_epoch,
                "dropped buffered leads from previous connection, broker redelivers them after ack wait"
            );
        }
        discarded
    }

    async fn flush(&self, reason: FlushReason) -> bool {
        let batch = self.buffer.drain().await;
        if batch.is_empty() {
            return false;
        }
        self.dispatcher.flush(batch, reason).await;
        if reason != FlushReason::Shutdown {
            self.metrics.log(&format!("post-{} flush", reason));
        }
        true
    }
}
