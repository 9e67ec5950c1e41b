//! # herald-server
//!
//! HTTP surface of the Herald pipeline (axum):
//!
//! - `POST /v1/events`: submit a policy-change event
//! - `POST /v1/events/{id}/replay`: re-dispatch unfinished channels of an event
//! - `GET /v1/events/{id}/ledger`, `GET /v1/ledger`: audit records
//! - `GET /v1/alerts`, `GET /v1/digests`: operator alerts, sealed windows
//! - `GET /health`, `GET /metrics`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use errors::{ApiError, ServerError};
pub use server::{AppState, HeraldServer};
pub use shutdown::ShutdownCoordinator;
