use crate::domain::{Counter, Lead, WorkerMetrics};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

/// Why a lead ended up in the dead-letter sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The whole batch was refused with a non-retryable status
    BatchFatal,
    /// The lead failed on its own during per-item delivery
    ItemFailed,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::BatchFatal => "batch_fatal",
            DeadLetterReason::ItemFailed => "item_failed",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable destination for leads that cannot be delivered.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persist the lead, returning once the sink has confirmed it.
    async fn publish(
        &self,
        lead: &Lead,
        reason: DeadLetterReason,
        status: Option<u16>,
    ) -> Result<()>;
}

/// Forwards permanently failed leads to the configured sink.
///
/// Without a sink the lead is dropped and logged. Sink failures are logged
/// and swallowed so the caller can always go on to reject the message.
#[derive(Clone)]
pub struct DeadLetterPublisher {
    sink: Option<Arc<dyn DeadLetterSink>>,
    metrics: Arc<WorkerMetrics>,
}

impl DeadLetterPublisher {
    pub fn new(sink: Option<Arc<dyn DeadLetterSink>>, metrics: Arc<WorkerMetrics>) -> Self {
        Self { sink, metrics }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub async fn publish(&self, lead: &Lead, reason: DeadLetterReason, status: Option<u16>) {
        let Some(sink) = &self.sink else {
            error!(
                email = %lead.email,
                status = ?status,
                reason = %reason,
                "no dead-letter sink configured, dropping lead"
            );
            return;
        };

        match sink.publish(lead, reason, status).await {
            Ok(()) => {
                self.metrics.inc(Counter::DeadLettered);
                warn!(email = %lead.email, status = ?status, reason = %reason, "lead dead-lettered");
            }
            Err(e) => {
                error!(
                    email = %lead.email,
                    reason = %reason,
                    error = %format!("{:#}", e),
                    "failed to publish lead to dead-letter sink"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lead;

    #[tokio::test]
    async fn test_publish_without_sink_drops() {
        let metrics = Arc::new(WorkerMetrics::new());
        let publisher = DeadLetterPublisher::new(None, metrics.clone());

        assert!(!publisher.is_enabled());
        publisher
            .publish(&lead("a@x.io"), DeadLetterReason::BatchFatal, Some(400))
            .await;
        assert_eq!(metrics.snapshot().dead_lettered, 0);
    }

    #[tokio::test]
    async fn test_publish_counts_confirmed_dead_letters() {
        let mut sink = MockDeadLetterSink::new();
        sink.expect_publish()
            .withf(|lead: &Lead, reason: &DeadLetterReason, status: &Option<u16>| {
                lead.email == "a@x.io"
                    && *reason == DeadLetterReason::ItemFailed
                    && *status == Some(400)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let metrics = Arc::new(WorkerMetrics::new());
        let publisher = DeadLetterPublisher::new(Some(Arc::new(sink)), metrics.clone());

        publisher
            .publish(&lead("a@x.io"), DeadLetterReason::ItemFailed, Some(400))
            .await;
        assert_eq!(metrics.snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let mut sink = MockDeadLetterSink::new();
        sink.expect_publish()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("stream unavailable")));

        let metrics = Arc::new(WorkerMetrics::new());
        let publisher = DeadLetterPublisher::new(Some(Arc::new(sink)), metrics.clone());

        publisher
            .publish(&lead("a@x.io"), DeadLetterReason::BatchFatal, None)
            .await;
        assert_eq!(metrics.snapshot().dead_lettered, 0);
    }
}
