use anyhow::{anyhow, Context, Result};
use async_nats::{jetstream, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter identifying the consumer instance a message was delivered on.
///
/// Advanced on every (re)connect. Delivery handles remember the value they were
/// created under and refuse to settle a message once the counter has moved on,
/// so acknowledgments never cross a reconnect.
#[derive(Debug, Clone, Default)]
pub struct ConnectionEpoch(Arc<AtomicU64>);

impl ConnectionEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Start a new epoch and return its value
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Handle used to settle a single delivered message.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeliveryHandle: Send + Sync {
    /// Positive acknowledgment; the broker forgets the message.
    async fn ack(&self) -> Result<()>;

    /// Negative acknowledgment. With `requeue` the broker redelivers the
    /// message; without it the message is terminated.
    async fn nack(&self, requeue: bool) -> Result<()>;

    /// Epoch the message was delivered in
    fn epoch(&self) -> u64;
}

/// A message pulled from the work queue, owned until it is settled.
pub struct RawMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
    pub handle: Box<dyn DeliveryHandle>,
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("subject", &self.subject)
            .field("payload_size", &self.payload.len())
            .field("epoch", &self.handle.epoch())
            .finish()
    }
}

/// Delivery handle backed by a JetStream message
pub struct JetStreamDelivery {
    message: jetstream::Message,
    epoch: u64,
    connection: ConnectionEpoch,
}

impl JetStreamDelivery {
    pub fn new(message: jetstream::Message, connection: ConnectionEpoch) -> Self {
        Self {
            message,
            epoch: connection.current(),
            connection,
        }
    }

    /// Split into the owned message parts plus the handle that settles it
    pub fn into_raw_message(self) -> RawMessage {
        RawMessage {
            subject: self.message.subject.to_string(),
            payload: self.message.payload.clone(),
            headers: self.message.headers.clone(),
            handle: Box::new(self),
        }
    }

    fn ensure_current(&self) -> Result<()> {
        let current = self.connection.current();
        if current != self.epoch {
            return Err(anyhow!(
                "delivery from connection epoch {} is stale (current epoch {}); broker will redeliver",
                self.epoch,
                current
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandle for JetStreamDelivery {
    async fn ack(&self) -> Result<()> {
        self.ensure_current()?;
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!(e))
            .context("failed to acknowledge message")
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.ensure_current()?;
        let kind = if requeue {
            jetstream::AckKind::Nak(None)
        } else {
            jetstream::AckKind::Term
        };
        self.message
            .ack_with(kind)
            .await
            .map_err(|e| anyhow!(e))
            .context("failed to reject message")
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}
