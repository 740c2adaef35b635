use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::nats::DeliveryHandle;
use std::sync::{Arc, Mutex};

/// How a recorded delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
    Reject,
}

/// Shared log of settlements, one slot per handle label.
#[derive(Debug, Clone, Default)]
pub struct SettlementLog(Arc<Mutex<Vec<(String, Settlement)>>>);

impl SettlementLog {
    pub fn handle(&self, label: &str) -> Box<dyn DeliveryHandle> {
        self.handle_in_epoch(label, 1)
    }

    pub fn handle_in_epoch(&self, label: &str, epoch: u64) -> Box<dyn DeliveryHandle> {
        Box::new(RecordingHandle {
            label: label.to_string(),
            epoch,
            log: self.clone(),
            fail: false,
        })
    }

    /// Handle whose settlement always fails, like a handle from a closed connection
    pub fn failing_handle(&self, label: &str) -> Box<dyn DeliveryHandle> {
        Box::new(RecordingHandle {
            label: label.to_string(),
            epoch: 1,
            log: self.clone(),
            fail: true,
        })
    }

    pub fn entries(&self) -> Vec<(String, Settlement)> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, settlement: Settlement) -> usize {
        self.entries()
            .iter()
            .filter(|(_, s)| *s == settlement)
            .count()
    }

    pub fn settlement_of(&self, label: &str) -> Vec<Settlement> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| l == label)
            .map(|(_, s)| s)
            .collect()
    }
}

struct RecordingHandle {
    label: String,
    epoch: u64,
    log: SettlementLog,
    fail: bool,
}

impl RecordingHandle {
    fn record(&self, settlement: Settlement) -> Result<()> {
        if self.fail {
            return Err(anyhow!("delivery {} is stale", self.label));
        }
        self.log
            .0
            .lock()
            .unwrap()
            .push((self.label.clone(), settlement));
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandle for RecordingHandle {
    async fn ack(&self) -> Result<()> {
        self.record(Settlement::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.record(if requeue {
            Settlement::Requeue
        } else {
            Settlement::Reject
        })
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}

pub fn lead(email: &str) -> crate::domain::Lead {
    crate::domain::Lead {
        email: email.to_string(),
        name: String::new(),
        phone_number: String::new(),
        company_name: String::new(),
        unique_query_id: String::new(),
        city: String::new(),
        state: String::new(),
    }
}

pub fn entry(log: &SettlementLog, email: &str) -> crate::domain::BatchEntry {
    crate::domain::BatchEntry {
        lead: lead(email),
        handle: log.handle(email),
    }
}
