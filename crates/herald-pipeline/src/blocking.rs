//! Bridge from async code to the synchronous ledger.
//!
//! `rusqlite` calls block, so every ledger access from the async pipeline
//! runs on tokio's blocking pool. Any failure, including a panicked
//! blocking task, is a [`LedgerWriteFault`].

use herald_ledger::DeliveryLedger;

use crate::errors::LedgerWriteFault;

pub(crate) async fn with_ledger<T, F>(ledger: &DeliveryLedger, f: F) -> Result<T, LedgerWriteFault>
where
    F: FnOnce(&DeliveryLedger) -> herald_ledger::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let ledger = ledger.clone();
    tokio::task::spawn_blocking(move || f(&ledger))
        .await
        .map_err(|e| LedgerWriteFault::new(format!("ledger task failed: {e}")))?
        .map_err(LedgerWriteFault::from)
}
