use crate::domain::Lead;
use common::nats::DeliveryHandle;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// A validated lead together with the handle that settles its message.
pub struct BatchEntry {
    pub lead: Lead,
    pub handle: Box<dyn DeliveryHandle>,
}

impl fmt::Debug for BatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchEntry")
            .field("email", &self.lead.email)
            .field("epoch", &self.handle.epoch())
            .finish()
    }
}

/// Result of [`BatchBuffer::add`]
#[derive(Debug)]
pub enum AddOutcome {
    /// Entry joined the open batch
    Buffered { flush_due: bool },
    /// Email already in the open batch; the caller must acknowledge this entry
    Duplicate(BatchEntry),
}

struct BufferState {
    entries: Vec<BatchEntry>,
    emails: HashSet<String>,
    last_flush: Instant,
}

/// Accumulates entries until the size threshold or the timeout is reached.
///
/// All state sits behind one lock; [`drain`](Self::drain) swaps the open batch
/// out atomically so concurrent flush triggers never flush an entry twice.
pub struct BatchBuffer {
    batch_size: usize,
    timeout: Duration,
    state: Mutex<BufferState>,
}

impl BatchBuffer {
    pub fn new(batch_size: usize, timeout: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            timeout,
            state: Mutex::new(BufferState {
                entries: Vec::new(),
                emails: HashSet::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    pub async fn add(&self, entry: BatchEntry) -> AddOutcome {
        let mut state = self.state.lock().await;

        if state.emails.contains(&entry.lead.email) {
            return AddOutcome::Duplicate(entry);
        }

        state.emails.insert(entry.lead.email.clone());
        state.entries.push(entry);

        AddOutcome::Buffered {
            flush_due: state.entries.len() >= self.batch_size,
        }
    }

    /// True when entries are waiting and the timeout has passed since the last flush
    pub async fn due_by_timeout(&self) -> bool {
        let state = self.state.lock().await;
        !state.entries.is_empty() && state.last_flush.elapsed() >= self.timeout
    }

    /// Detach the open batch and start a new one
    pub async fn drain(&self) -> Vec<BatchEntry> {
        let mut state = self.state.lock().await;
        state.emails.clear();
        state.last_flush = Instant::now();
        std::mem::take(&mut state.entries)
    }

    /// Drop entries delivered before `current_epoch`.
    ///
    /// Their handles can no longer settle the message. The broker redelivers
    /// them on the new consumer once their ack wait expires. Returns how many
    /// were dropped.
    pub async fn discard_stale(&self, current_epoch: u64) -> usize {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|entry| entry.handle.epoch() == current_epoch);

        let discarded = before - state.entries.len();
        if discarded > 0 {
            let emails = state
                .entries
                .iter()
                .map(|entry| entry.lead.email.clone())
                .collect();
            state.emails = emails;
            debug!(discarded, current_epoch, "discarded stale buffered entries");
        }
        discarded
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{entry, SettlementLog};

    #[tokio::test]
    async fn test_flush_due_at_size_threshold() {
        let log = SettlementLog::default();
        let buffer = BatchBuffer::new(3, Duration::from_secs(5));

        assert!(matches!(
            buffer.add(entry(&log, "a@x.io")).await,
            AddOutcome::Buffered { flush_due: false }
        ));
        assert!(matches!(
            buffer.add(entry(&log, "b@x.io")).await,
            AddOutcome::Buffered { flush_due: false }
        ));
        assert!(matches!(
            buffer.add(entry(&log, "c@x.io")).await,
            AddOutcome::Buffered { flush_due: true }
        ));
        assert_eq!(buffer.len().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_returned() {
        let log = SettlementLog::default();
        let buffer = BatchBuffer::new(10, Duration::from_secs(5));

        buffer.add(entry(&log, "a@x.io")).await;
        match buffer.add(entry(&log, "a@x.io")).await {
            AddOutcome::Duplicate(dup) => assert_eq!(dup.lead.email, "a@x.io"),
            other => panic!("expected duplicate, got {:?}", other),
        }
        assert_eq!(buffer.len().await, 1);
    }

    #[tokio::test]
    async fn test_drain_resets_batch_and_dedupe_set() {
        let log = SettlementLog::default();
        let buffer = BatchBuffer::new(10, Duration::from_secs(5));

        buffer.add(entry(&log, "a@x.io")).await;
        buffer.add(entry(&log, "b@x.io")).await;

        let batch = buffer.drain().await;
        assert_eq!(batch.len(), 2);
        assert!(buffer.is_empty().await);
        assert!(buffer.drain().await.is_empty());

        assert!(matches!(
            buffer.add(entry(&log, "a@x.io")).await,
            AddOutcome::Buffered { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_by_timeout() {
        let log = SettlementLog::default();
        let buffer = BatchBuffer::new(10, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!buffer.due_by_timeout().await, "empty buffer is never due");

        buffer.drain().await;
        buffer.add(entry(&log, "a@x.io")).await;
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!buffer.due_by_timeout().await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(buffer.due_by_timeout().await);
    }

    #[tokio::test]
    async fn test_discard_stale_keeps_current_epoch() {
        let log = SettlementLog::default();
        let buffer = BatchBuffer::new(10, Duration::from_secs(5));

        buffer
            .add(BatchEntry {
                lead: crate::test_support::lead("old@x.io"),
                handle: log.handle_in_epoch("old", 1),
            })
            .await;
        buffer
            .add(BatchEntry {
                lead: crate::test_support::lead("new@x.io"),
                handle: log.handle_in_epoch("new", 2),
            })
            .await;

        assert_eq!(buffer.discard_stale(2).await, 1);
        assert_eq!(buffer.len().await, 1);

        // the dropped email may be buffered again once redelivered
        assert!(matches!(
            buffer
                .add(BatchEntry {
                    lead: crate::test_support::lead("old@x.io"),
                    handle: log.handle_in_epoch("old-again", 2),
                })
                .await,
            AddOutcome::Buffered { .. }
        ));
        assert!(log.entries().is_empty());
    }
}
