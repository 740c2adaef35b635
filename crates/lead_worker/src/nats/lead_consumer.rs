use crate::domain::{Backpressure, LeadIntake};
use crate::nats::BrokerConnection;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pull settings of the consume loop
#[derive(Debug, Clone)]
pub struct ConsumeConfig {
    /// Most messages requested per pull
    pub fetch_batch: usize,
    /// How long one pull waits for the first message
    pub poll_interval: Duration,
}

impl Default for ConsumeConfig {
    fn default() -> Self {
        Self {
            fetch_batch: 100,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Consumes the lead queue, reconnecting whenever the consumer fails.
pub struct LeadConsumer {
    connection: BrokerConnection,
    intake: Arc<LeadIntake>,
    backpressure: Arc<Backpressure>,
    config: ConsumeConfig,
}

impl LeadConsumer {
    pub fn new(
        connection: BrokerConnection,
        intake: Arc<LeadIntake>,
        backpressure: Arc<Backpressure>,
        config: ConsumeConfig,
    ) -> Self {
        Self {
            connection,
            intake,
            backpressure,
            config,
        }
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(
            queue = %self.connection.topology().queue_name,
            fetch_batch = self.config.fetch_batch,
            "starting lead consumer"
        );

        'connection: while !ctx.is_cancelled() {
            let Some(consumer) = self.connection.connect(&ctx).await else {
                break;
            };

            let epoch = self.connection.epoch().current();
            self.intake.discard_stale(epoch).await;

            loop {
                if !self.backpressure.wait(&ctx).await {
                    break 'connection;
                }

                let fetched = tokio::select! {
                    _ = ctx.cancelled() => None,
                    result = consumer.fetch_messages(self.config.fetch_batch, self.config.poll_interval) => Some(result),
                };
                let Some(fetched) = fetched else {
                    break 'connection;
                };

                match fetched {
                    Ok(messages) => {
                        if !messages.is_empty() {
                            debug!(count = messages.len(), epoch, "fetched lead messages");
                        }
                        for message in messages {
                            self.intake.handle(message).await;
                        }
                    }
                    Err(e) => {
                        let delay = self.connection.backoff().delay(1);
                        warn!(
                            epoch,
                            error = %format!("{:#}", e),
                            reconnect_in_secs = delay.as_secs_f64(),
                            "lead consumer failed, reconnecting"
                        );
                        tokio::select! {
                            _ = ctx.cancelled() => break 'connection,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        break;
                    }
                }
            }
        }

        info!("lead consumer stopped");
        Ok(())
    }
}
