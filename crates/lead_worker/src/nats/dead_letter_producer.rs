use crate::domain::{DeadLetterReason, DeadLetterSink, Lead};
use anyhow::{Context, Result};
use async_nats::HeaderMap;
use async_trait::async_trait;
use chrono::Utc;
use common::nats::{inject_trace_context, JetStreamPublisher};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const HEADER_DEAD_LETTER_REASON: &str = "x-dead-letter-reason";
pub const HEADER_FAILED_STATUS: &str = "x-failed-status";
pub const HEADER_DEAD_LETTERED_AT: &str = "x-dead-lettered-at";

/// Publishes dead-lettered leads to `<exchange>.<reason>`.
pub struct NatsDeadLetterProducer {
    publisher: Arc<dyn JetStreamPublisher>,
    exchange: String,
}

impl NatsDeadLetterProducer {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>, exchange: String) -> Self {
        debug!(exchange = %exchange, "initialized dead-letter producer");
        Self {
            publisher,
            exchange,
        }
    }

    fn subject(&self, reason: DeadLetterReason) -> String {
        format!("{}.{}", self.exchange, reason)
    }
}

#[async_trait]
impl DeadLetterSink for NatsDeadLetterProducer {
    #[instrument(skip(self, lead), fields(email = %lead.email, reason = %reason))]
    async fn publish(
        &self,
        lead: &Lead,
        reason: DeadLetterReason,
        status: Option<u16>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(lead).context("failed to serialize dead-lettered lead")?;

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/json");
        headers.insert(HEADER_DEAD_LETTER_REASON, reason.as_str());
        if let Some(status) = status {
            headers.insert(HEADER_FAILED_STATUS, status.to_string().as_str());
        }
        headers.insert(HEADER_DEAD_LETTERED_AT, Utc::now().to_rfc3339().as_str());
        inject_trace_context(&mut headers);

        let subject = self.subject(reason);
        self.publisher
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .with_context(|| format!("failed to publish dead letter to {}", subject))
    }
}
