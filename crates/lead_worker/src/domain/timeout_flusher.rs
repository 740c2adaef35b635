use crate::domain::{Backpressure, LeadIntake};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Polls the buffer and flushes it once the batch timeout has elapsed.
///
/// Bounds latency when traffic is too low to ever reach the size threshold.
pub struct TimeoutFlusher {
    intake: Arc<LeadIntake>,
    backpressure: Arc<Backpressure>,
    poll_interval: Duration,
}

impl TimeoutFlusher {
    pub fn new(
        intake: Arc<LeadIntake>,
        backpressure: Arc<Backpressure>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            intake,
            backpressure,
            poll_interval,
        }
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "starting timeout flusher"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if !self.backpressure.wait(&ctx).await {
                break;
            }

            if self.intake.flush_if_due().await {
                info!("batch timeout reached, flushed buffered leads");
            }
        }

        info!("timeout flusher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BatchBuffer, DeadLetterPublisher, DispatcherConfig, FlushDispatcher, MockContactStore,
        WorkerMetrics,
    };
    use crate::test_support::{Settlement, SettlementLog};
    use bytes::Bytes;
    use common::nats::RawMessage;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_idle_buffer_flushes_within_timeout_plus_poll() {
        let flushed_at = Arc::new(std::sync::Mutex::new(None));
        let recorded = flushed_at.clone();

        let mut store = MockContactStore::new();
        store.expect_post_contacts().times(1).returning(move |_, _| {
            *recorded.lock().unwrap() = Some(Instant::now());
            Ok(())
        });

        let metrics = Arc::new(WorkerMetrics::new());
        let backpressure = Arc::new(Backpressure::new());
        let buffer = Arc::new(BatchBuffer::new(100, Duration::from_secs(5)));
        let dispatcher = Arc::new(FlushDispatcher::new(
            Arc::new(store),
            DeadLetterPublisher::new(None, metrics.clone()),
            metrics.clone(),
            backpressure.clone(),
            DispatcherConfig::default(),
        ));
        let intake = Arc::new(LeadIntake::new(buffer, dispatcher, metrics));

        let log = SettlementLog::default();
        let start = Instant::now();
        intake
            .handle(RawMessage {
                subject: "lead_queue".into(),
                payload: Bytes::from_static(br#"{"SENDER_EMAIL":"a@x.io"}"#),
                headers: None,
                handle: log.handle("m1"),
            })
            .await;

        let ctx = CancellationToken::new();
        let flusher = TimeoutFlusher::new(intake, backpressure, Duration::from_secs(1));
        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { flusher.run(ctx).await })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        ctx.cancel();
        task.await.unwrap().unwrap();

        let flushed_at = flushed_at.lock().unwrap().expect("buffer was never flushed");
        assert!(flushed_at - start <= Duration::from_secs(6));
        assert_eq!(log.settlement_of("m1"), vec![Settlement::Ack]);
    }
}
