use anyhow::{Context, Result};
use async_nats::jetstream::consumer::{pull, AckPolicy};
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use common::nats::{
    ensure_stream, retry_until_cancelled, ConnectionEpoch, JetStreamConsumer, JetStreamPublisher,
    PullConsumer, ReconnectBackoff,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Names of the dead-letter exchange (subject prefix) and queue (stream)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTopology {
    pub exchange: String,
    pub queue: String,
}

/// Broker objects the worker declares and consumes from.
#[derive(Debug, Clone)]
pub struct QueueTopology {
    pub queue_name: String,
    pub consumer_name: String,
    pub dead_letter: Option<DeadLetterTopology>,
    pub prefetch: usize,
    pub ack_wait: Duration,
    pub max_deliver: i64,
}

impl QueueTopology {
    /// Durable work queue: every message is consumed by exactly one consumer
    pub fn work_queue_stream(&self) -> StreamConfig {
        StreamConfig {
            name: self.queue_name.clone(),
            subjects: vec![self.queue_name.clone(), format!("{}.>", self.queue_name)],
            retention: RetentionPolicy::WorkQueue,
            storage: StorageType::File,
            ..Default::default()
        }
    }

    /// Dead-letter stream, bound to the exchange prefix and to the broker's
    /// max-deliveries advisory for the work queue consumer.
    pub fn dead_letter_stream(&self) -> Option<StreamConfig> {
        self.dead_letter.as_ref().map(|dl| StreamConfig {
            name: dl.queue.clone(),
            subjects: vec![
                format!("{}.>", dl.exchange),
                format!(
                    "$JS.EVENT.ADVISORY.CONSUMER.MAX_DELIVERIES.{}.{}",
                    self.queue_name, self.consumer_name
                ),
            ],
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            ..Default::default()
        })
    }

    pub fn consumer_config(&self) -> pull::Config {
        pull::Config {
            durable_name: Some(self.consumer_name.clone()),
            ack_policy: AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            max_deliver: self.max_deliver,
            max_ack_pending: i64::try_from(self.prefetch).unwrap_or(i64::MAX),
            ..Default::default()
        }
    }

    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.dead_letter.as_ref().map(|dl| dl.exchange.as_str())
    }

    /// Subject sample leads are published to
    pub fn demo_subject(&self) -> String {
        format!("{}.demo", self.queue_name)
    }
}

/// Owns consumer (re)creation and the connection epoch.
pub struct BrokerConnection {
    consumer_client: Arc<dyn JetStreamConsumer>,
    publisher: Arc<dyn JetStreamPublisher>,
    topology: QueueTopology,
    epoch: ConnectionEpoch,
    backoff: ReconnectBackoff,
}

impl BrokerConnection {
    pub fn new(
        consumer_client: Arc<dyn JetStreamConsumer>,
        publisher: Arc<dyn JetStreamPublisher>,
        topology: QueueTopology,
        backoff: ReconnectBackoff,
    ) -> Self {
        Self {
            consumer_client,
            publisher,
            topology,
            epoch: ConnectionEpoch::new(),
            backoff,
        }
    }

    pub fn epoch(&self) -> &ConnectionEpoch {
        &self.epoch
    }

    pub fn backoff(&self) -> &ReconnectBackoff {
        &self.backoff
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    /// Declare the work queue and, when configured, the dead-letter stream
    pub async fn declare_topology(&self) -> Result<()> {
        ensure_stream(self.publisher.as_ref(), self.topology.work_queue_stream())
            .await
            .context("failed to declare work queue")?;

        if let Some(config) = self.topology.dead_letter_stream() {
            ensure_stream(self.publisher.as_ref(), config)
                .await
                .context("failed to declare dead-letter queue")?;
        }

        Ok(())
    }

    /// Declare topology and open a consumer under a fresh epoch
    pub async fn open_consumer(&self) -> Result<Box<dyn PullConsumer>> {
        self.declare_topology().await?;

        let epoch = self.epoch.advance();
        let consumer = self
            .consumer_client
            .create_consumer(
                self.topology.consumer_config(),
                &self.topology.queue_name,
                self.epoch.clone(),
            )
            .await
            .with_context(|| format!("failed to create consumer {}", self.topology.consumer_name))?;

        info!(
            queue = %self.topology.queue_name,
            consumer = %self.topology.consumer_name,
            prefetch = self.topology.prefetch,
            epoch,
            "lead consumer connected"
        );
        Ok(consumer)
    }

    /// Open a consumer, retrying with backoff. `None` once cancelled.
    pub async fn connect(&self, ctx: &CancellationToken) -> Option<Box<dyn PullConsumer>> {
        retry_until_cancelled(&self.backoff, ctx, "open_lead_consumer", || {
            self.open_consumer()
        })
        .await
    }
}
