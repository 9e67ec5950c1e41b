//! High-level `DeliveryLedger` API.
//!
//! The [`DeliveryLedger`] composes the repositories into transactional
//! operations. All writes are atomic and durable before they return.

mod ledger;

pub use ledger::*;
