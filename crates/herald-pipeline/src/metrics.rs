//! Metric name constants.
//!
//! Counters are recorded through the `metrics` facade; the binary installs a
//! Prometheus recorder and serves `/metrics`. Without a recorder every call is
//! a no-op, which is what unit tests rely on.

/// Events accepted (counter).
pub const EVENTS_INGESTED_TOTAL: &str = "herald_events_ingested_total";
/// Events rejected (counter, labels: reason).
pub const EVENTS_REJECTED_TOTAL: &str = "herald_events_rejected_total";
/// Delivery attempts started (counter, labels: channel).
pub const DELIVERY_ATTEMPTS_TOTAL: &str = "herald_delivery_attempts_total";
/// Tasks reaching a terminal state (counter, labels: channel, status).
pub const DELIVERIES_TOTAL: &str = "herald_deliveries_total";
/// Digest windows sealed (counter).
pub const DIGESTS_SEALED_TOTAL: &str = "herald_digests_sealed_total";
/// Ledger write faults (counter).
pub const LEDGER_FAULTS_TOTAL: &str = "herald_ledger_faults_total";

/// All metric names, for exporters and tests.
pub const ALL: [&str; 6] = [
    EVENTS_INGESTED_TOTAL,
    EVENTS_REJECTED_TOTAL,
    DELIVERY_ATTEMPTS_TOTAL,
    DELIVERIES_TOTAL,
    DIGESTS_SEALED_TOTAL,
    LEDGER_FAULTS_TOTAL,
];
