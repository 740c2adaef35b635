use anyhow::{Context, Result};
use async_nats::HeaderMap;
use common::nats::JetStreamPublisher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Configuration for the demo lead producer
#[derive(Debug, Clone)]
pub struct DemoProducerConfig {
    /// Interval between published leads
    pub interval: Duration,
    /// Subject the leads are published to
    pub subject: String,
}

impl Default for DemoProducerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            subject: "lead_queue.demo".to_string(),
        }
    }
}

/// Build a sample lead in the producer wire format with a unique email
pub fn sample_lead() -> serde_json::Value {
    let id = xid::new().to_string();
    json!({
        "UNIQUE_QUERY_ID": id,
        "SENDER_NAME": "John Doe",
        "SENDER_EMAIL": format!("john.doe+{}@example.com", id),
        "SENDER_MOBILE": "9876543210",
        "SENDER_COMPANY": "Acme Corp",
        "CITY": "Mumbai",
        "STATE": "Maharashtra",
    })
}

/// Publish sample leads until cancelled.
///
/// Publish failures are logged and the loop keeps going.
pub async fn run_demo_producer(
    ctx: CancellationToken,
    config: DemoProducerConfig,
    publisher: Arc<dyn JetStreamPublisher>,
) -> Result<()> {
    info!(subject = %config.subject, "demo producer started");

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("received shutdown signal, stopping demo producer");
                break;
            }
            _ = tokio::time::sleep(config.interval) => {
                let lead = sample_lead();
                let payload = serde_json::to_vec(&lead).context("failed to serialize demo lead")?;

                match publisher
                    .publish_with_headers(config.subject.clone(), HeaderMap::new(), payload.into())
                    .await
                {
                    Ok(()) => debug!(email = %lead["SENDER_EMAIL"], "published demo lead"),
                    Err(e) => error!(error = %format!("{:#}", e), "failed to publish demo lead"),
                }
            }
        }
    }

    info!("demo producer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse_lead;
    use bytes::Bytes;
    use common::nats::MockJetStreamPublisher;

    #[test]
    fn test_sample_leads_are_valid_and_unique() {
        let first = serde_json::to_vec(&sample_lead()).unwrap();
        let second = serde_json::to_vec(&sample_lead()).unwrap();

        let first = parse_lead(&first).unwrap();
        let second = parse_lead(&second).unwrap();
        assert_ne!(first.email, second.email);
        assert_eq!(first.company_name, "Acme Corp");
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_until_cancelled_and_survives_failures() {
        let mut publisher = MockJetStreamPublisher::new();
        let mut calls = 0;
        publisher
            .expect_publish_with_headers()
            .withf(|subject: &String, _: &HeaderMap, payload: &Bytes| {
                subject == "lead_queue.demo" && parse_lead(payload).is_ok()
            })
            .times(3)
            .returning(move |_, _, _| {
                calls += 1;
                if calls == 1 {
                    Err(anyhow::anyhow!("no responders"))
                } else {
                    Ok(())
                }
            });

        let ctx = CancellationToken::new();
        let task = tokio::spawn(run_demo_producer(
            ctx.clone(),
            DemoProducerConfig::default(),
            Arc::new(publisher),
        ));

        tokio::time::sleep(Duration::from_secs(17)).await;
        ctx.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
