//! Ledger adapter: the audit channel.
//!
//! Delivery on this channel *is* the ledger append, so the adapter writes the
//! Delivered record itself. The dispatcher's own terminal append for the same
//! task then resolves to `AlreadyDelivered`.

use async_trait::async_trait;
use herald_core::{Channel, DeliveryStatus, DeliveryTask, NewLedgerRecord};
use herald_ledger::{AppendOutcome, DeliveryLedger};
use tracing::debug;

use super::{AdapterError, ChannelAdapter};
use crate::blocking::with_ledger;

/// Appends audit records to the [`DeliveryLedger`].
#[derive(Clone, Debug)]
pub struct LedgerAdapter {
    ledger: DeliveryLedger,
}

impl LedgerAdapter {
    /// Adapter writing to `ledger`.
    pub fn new(ledger: DeliveryLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ChannelAdapter for LedgerAdapter {
    fn channel(&self) -> Channel {
        Channel::Ledger
    }

    async fn deliver(&self, task: &DeliveryTask) -> Result<(), AdapterError> {
        let mut record = NewLedgerRecord::from_task(task);
        record.status = DeliveryStatus::Delivered;
        record.reason = None;

        let outcome = with_ledger(&self.ledger, move |ledger| ledger.append(&record))
            .await
            .map_err(|fault| AdapterError::LedgerWrite(fault.message))?;
        match outcome {
            AppendOutcome::Appended(r) => {
                debug!(task_id = %task.id, sequence = r.sequence, "audit record appended");
            }
            AppendOutcome::AlreadyDelivered(r) => {
                debug!(task_id = %task.id, sequence = r.sequence, "audit record already present");
            }
        }
        Ok(())
    }
}
