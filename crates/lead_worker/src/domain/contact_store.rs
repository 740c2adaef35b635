use crate::domain::{ContactStoreError, Lead};
use async_trait::async_trait;
use std::time::Duration;

/// Downstream store that owns contact records.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Submit leads as one request, giving up after `timeout` per attempt.
    async fn post_contacts(
        &self,
        leads: &[Lead],
        timeout: Duration,
    ) -> Result<(), ContactStoreError>;
}
