use crate::nats::{
    retry_until_cancelled, ConnectionEpoch, JetStreamConsumer, JetStreamDelivery,
    JetStreamPublisher, PullConsumer, RawMessage, ReconnectBackoff,
};
use anyhow::{anyhow, Context, Result};
use async_nats::jetstream;
use async_nats::HeaderMap;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Connection settings for the NATS server
#[derive(Debug, Clone)]
pub struct NatsConnectOptions {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub connection_name: String,
    pub connection_timeout: Duration,
}

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(options: &NatsConnectOptions) -> Result<Self> {
        info!(
            url = %options.url,
            connection_name = %options.connection_name,
            timeout_ms = options.connection_timeout.as_millis(),
            "connecting to NATS"
        );

        let mut connect_options = async_nats::ConnectOptions::new()
            .name(&options.connection_name)
            .connection_timeout(options.connection_timeout)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("NATS connection established"),
                    async_nats::Event::Disconnected => warn!("NATS connection lost"),
                    other => info!(event = %other, "NATS connection event"),
                }
            });

        if let (Some(user), Some(password)) = (&options.user, &options.password) {
            connect_options = connect_options.user_and_password(user.clone(), password.clone());
        }

        let client = connect_options
            .connect(options.url.as_str())
            .await
            .context("failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Connect, retrying with backoff until success or cancellation.
    ///
    /// Fails only when the token is cancelled before any attempt succeeded.
    pub async fn connect_with_backoff(
        options: &NatsConnectOptions,
        backoff: &ReconnectBackoff,
        ctx: &CancellationToken,
    ) -> Result<Self> {
        retry_until_cancelled(backoff, ctx, "nats_connect", || Self::connect(options))
            .await
            .ok_or_else(|| anyhow!("shutdown requested before NATS connection was established"))
    }

    /// Create a JetStreamConsumer trait object from this client
    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    /// Create a JetStreamPublisher trait object from this client
    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    /// Flush pending publishes and close the connection
    pub async fn close(self) {
        info!("closing NATS connection");
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "failed to flush NATS connection on close");
        }
    }
}

/// Concrete implementation of JetStreamConsumer using async-nats
pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
        epoch: ConnectionEpoch,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer, epoch }))
    }
}

/// Concrete implementation of PullConsumer using async-nats
pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
    epoch: ConnectionEpoch,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<RawMessage>> {
        use futures::StreamExt;

        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .map_err(|e| anyhow!(e))
            .context("failed to fetch messages")?;

        let mut result = Vec::new();
        while let Some(msg) = messages.next().await {
            match msg {
                Ok(message) => {
                    result.push(JetStreamDelivery::new(message, self.epoch.clone()).into_raw_message())
                }
                Err(e) if result.is_empty() => {
                    return Err(anyhow!(e)).context("failed to receive message");
                }
                Err(e) => {
                    // Keep what arrived; the next fetch surfaces a persistent failure
                    warn!(error = %e, received = result.len(), "error receiving message");
                    break;
                }
            }
        }
        Ok(result)
    }
}

/// Concrete implementation of JetStreamPublisher using async-nats
pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn get_stream(&self, stream_name: &str) -> Result<()> {
        self.context
            .get_stream(stream_name)
            .await
            .context("failed to get stream")?;
        Ok(())
    }

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()> {
        self.context
            .create_stream(config)
            .await
            .context("failed to create stream")?;
        Ok(())
    }

    #[instrument(skip(self, headers, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: bytes::Bytes,
    ) -> Result<()> {
        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("failed to publish message to JetStream")?;

        ack.await
            .context("failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}
