//! # herald-core
//!
//! Foundation types shared by every Herald crate.
//!
//! - **Branded IDs**: `EventId`, `TaskId`, `AlertId` as newtypes for type safety
//! - **Events**: `PolicyChangeEvent`, `ClassifiedEvent`, `ImpactTier`, `ChangeType`
//! - **Delivery**: `DeliveryTask`, `DeliveryStatus` state machine, `Channel`, `Notification`
//! - **Audit**: `LedgerRecord`, `DigestWindow`, `OperatorAlert`
//! - **Retry**: `RetryConfig` and exponential backoff math
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod audit;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod retry;

pub use audit::{AlertKind, DigestWindow, LedgerRecord, NewLedgerRecord, OperatorAlert};
pub use delivery::{Channel, DeliveryStatus, DeliveryTask, Notification};
pub use errors::{ParseError, TransitionError};
pub use events::{ChangeType, ClassifiedEvent, ImpactTier, PolicyChangeEvent};
pub use ids::{AlertId, EventId, TaskId};
pub use retry::RetryConfig;

/// Current UTC time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
