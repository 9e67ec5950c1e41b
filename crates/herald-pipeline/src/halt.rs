//! Pipeline halt switch.
//!
//! Tripped by the first [`LedgerWriteFault`]. Once tripped it stays tripped
//! for the life of the process: new events are refused and the digest
//! scheduler stops. Recovery is a restart once storage is healthy.

use std::fmt;
use std::sync::Arc;

use herald_core::OperatorAlert;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::alerts::AlertSink;
use crate::errors::LedgerWriteFault;
use crate::metrics::LEDGER_FAULTS_TOTAL;

struct Inner {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
    alerts: Arc<dyn AlertSink>,
}

/// Shared, one-way halt flag.
#[derive(Clone)]
pub struct HaltSwitch {
    inner: Arc<Inner>,
}

impl HaltSwitch {
    /// Switch that reports faults to `alerts`.
    pub fn new(alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                reason: Mutex::new(None),
                alerts,
            }),
        }
    }

    /// Record `fault` and halt. Returns `true` if this call tripped the switch.
    ///
    /// Raises an operator alarm on every call. The alarm is logged even when
    /// the ledger cannot persist it.
    pub async fn trip(&self, fault: &LedgerWriteFault) -> bool {
        ::metrics::counter!(LEDGER_FAULTS_TOTAL).increment(1);
        let first = {
            let mut reason = self.inner.reason.lock();
            if reason.is_none() {
                *reason = Some(fault.message.clone());
                true
            } else {
                false
            }
        };
        self.inner.token.cancel();
        error!(error = %fault, first, "ledger unavailable, pipeline halted");

        if let Err(e) = self
            .inner
            .alerts
            .raise(OperatorAlert::ledger_fault(fault.message.clone()))
            .await
        {
            error!(error = %e, "ledger fault alarm could not be persisted");
        }
        first
    }

    /// Whether the switch has been tripped.
    pub fn is_halted(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The fault that tripped the switch.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Resolves once the switch is tripped.
    pub async fn halted(&self) {
        self.inner.token.cancelled().await;
    }
}

impl fmt::Debug for HaltSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaltSwitch")
            .field("halted", &self.is_halted())
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}
