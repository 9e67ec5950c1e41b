//! # herald-pipeline
//!
//! The policy-change notification pipeline:
//!
//! ```text
//! RawEvent ─► Ingestor ─► Classifier ─► Router ─► Dispatcher ─► ChannelAdapter
//!                │                                   │
//!                └──────────► DeliveryLedger ◄───────┘
//!                                   ▲
//!                          DigestScheduler (timer)
//! ```
//!
//! - [`ingest`]: validation, ingestion sequence, duplicate detection
//! - [`classify`]: impact tier from severity hint and weight table
//! - [`route`]: tier → channel tasks
//! - [`adapters`]: webhook, SMS, email and ledger channels
//! - [`dispatch`]: retry state machine with idempotent re-dispatch
//! - [`digest`]: periodic aggregation of Low/Medium events
//! - [`pipeline`]: orchestration, startup recovery, shutdown and halt-on-fault

#![deny(unsafe_code)]

pub mod adapters;
pub mod alerts;
mod blocking;
pub mod classify;
pub mod digest;
pub mod dispatch;
pub mod errors;
pub mod halt;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod route;

pub use adapters::{AdapterError, AdapterSet, ChannelAdapter};
pub use alerts::{AlertSink, LedgerAlertSink};
pub use classify::{Classifier, WeightTable};
pub use digest::{DigestScheduler, TickOutcome};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use errors::{DigestError, IngestError, LedgerWriteFault, SubmitError, ValidationError};
pub use halt::HaltSwitch;
pub use ingest::{IngestedEvent, Ingestor, RawEvent};
pub use pipeline::{Accepted, Pipeline, PipelineBuilder, Recovery};
pub use route::{RoutePlan, Router, RoutingTable};
