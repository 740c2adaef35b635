use crate::domain::{ContactStore, ContactStoreError, Lead};
use crate::http::{parse_retry_after, RetryPolicy};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const MAX_LOGGED_BODY_CHARS: usize = 300;

struct FailedAttempt {
    error: ContactStoreError,
    retry_after: Option<Duration>,
}

/// [`ContactStore`] backed by the contact service's batch endpoint.
pub struct HttpContactStore {
    client: Client,
    url: Url,
    retry: RetryPolicy,
}

impl HttpContactStore {
    pub fn new(url: &str, retry: RetryPolicy) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid contact service URL '{}'", url))?;
        let client = Client::builder()
            .user_agent(concat!("lead-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, url, retry })
    }

    async fn send_once(&self, leads: &[Lead], timeout: Duration) -> Result<(), FailedAttempt> {
        let response = self
            .client
            .post(self.url.clone())
            .timeout(timeout)
            .json(leads)
            .send()
            .await
            .map_err(|e| FailedAttempt {
                error: ContactStoreError::Network(e.to_string()),
                retry_after: None,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_LOGGED_BODY_CHARS)
            .collect();

        Err(FailedAttempt {
            error: ContactStoreError::from_status(status.as_u16(), body),
            retry_after,
        })
    }
}

#[async_trait]
impl ContactStore for HttpContactStore {
    #[instrument(skip(self, leads), fields(count = leads.len(), url = %self.url))]
    async fn post_contacts(
        &self,
        leads: &[Lead],
        timeout: Duration,
    ) -> Result<(), ContactStoreError> {
        let mut retry: u32 = 0;

        loop {
            match self.send_once(leads, timeout).await {
                Ok(()) => {
                    debug!(count = leads.len(), retries = retry, "contact store accepted leads");
                    return Ok(());
                }
                Err(attempt) if attempt.error.is_transient() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry, attempt.retry_after);
                    warn!(
                        retry,
                        max_retries = self.retry.max_retries,
                        delay_secs = delay.as_secs_f64(),
                        error = %attempt.error,
                        "contact store request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(attempt) => return Err(attempt.error),
            }
        }
    }
}
