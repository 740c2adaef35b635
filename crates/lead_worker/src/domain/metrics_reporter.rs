use crate::domain::WorkerMetrics;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Logs the worker counters on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<WorkerMetrics>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<WorkerMetrics>, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "starting metrics reporter");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => self.metrics.log("periodic"),
            }
        }

        info!("metrics reporter stopped");
        Ok(())
    }
}
