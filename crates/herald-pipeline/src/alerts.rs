//! Operator alert channel.
//!
//! Distinct from the user-facing channels: alerts go to the operator through
//! the error log and the `operator_alerts` table, never through an adapter.

use async_trait::async_trait;
use herald_core::OperatorAlert;
use herald_ledger::DeliveryLedger;
use tracing::error;

use crate::blocking::with_ledger;
use crate::errors::LedgerWriteFault;

/// Destination of operator alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Raise `alert`. Returns `false` when an alert with the same dedupe key
    /// was already raised.
    async fn raise(&self, alert: OperatorAlert) -> Result<bool, LedgerWriteFault>;
}

/// Logs alerts at error level and persists them in the ledger database.
#[derive(Clone, Debug)]
pub struct LedgerAlertSink {
    ledger: DeliveryLedger,
}

impl LedgerAlertSink {
    /// Sink writing to `ledger`.
    pub fn new(ledger: DeliveryLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl AlertSink for LedgerAlertSink {
    async fn raise(&self, alert: OperatorAlert) -> Result<bool, LedgerWriteFault> {
        error!(
            alert_id = %alert.id,
            kind = %alert.kind,
            task_id = alert.task_id.as_ref().map_or("", |t| t.as_str()),
            channel = alert.channel.map_or("", |c| c.as_str()),
            "OPERATOR ALERT: {}",
            alert.message
        );
        with_ledger(&self.ledger, move |ledger| ledger.record_alert(&alert)).await
    }
}
