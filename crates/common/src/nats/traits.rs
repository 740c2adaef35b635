use crate::nats::{ConnectionEpoch, RawMessage};
use anyhow::Result;
use async_nats::{jetstream, HeaderMap};
use async_trait::async_trait;
use std::time::Duration;

/// Trait for JetStream consumer operations
/// Abstracts creation of the durable pull consumer the worker reads from
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamConsumer: Send + Sync {
    /// Create (or bind to) a durable pull consumer on a stream.
    ///
    /// Messages fetched through the returned consumer carry delivery handles
    /// stamped with the epoch's current value.
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
        epoch: ConnectionEpoch,
    ) -> Result<Box<dyn PullConsumer>>;
}

/// Trait for pull consumer operations
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PullConsumer: Send + Sync {
    /// Fetch up to `max_messages`, waiting at most `expires` for the first one.
    ///
    /// An empty vector means the poll interval elapsed with nothing to deliver.
    /// An error means the consumer is no longer usable and must be recreated.
    async fn fetch_messages(&self, max_messages: usize, expires: Duration)
        -> Result<Vec<RawMessage>>;
}

/// Trait for JetStream publisher operations
/// Abstracts stream declaration and durable publishing
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamPublisher: Send + Sync {
    /// Get an existing stream by name
    async fn get_stream(&self, stream_name: &str) -> Result<()>;

    /// Create a new stream with the given configuration
    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()>;

    /// Publish a message and wait for the stream's persistence acknowledgment
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: bytes::Bytes,
    ) -> Result<()>;
}
