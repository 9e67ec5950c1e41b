//! Digest Scheduler.
//!
//! Every period, aggregates the Low and Medium events the ledger channel
//! recorded since the last sealed window into one email, then seals the
//! window. Window state lives in the ledger database, so a restart resumes
//! exactly where the previous process stopped.

use std::sync::Arc;
use std::time::Duration;

use herald_core::{DeliveryTask, DigestWindow, EventId, LedgerRecord, Notification, TaskId};
use herald_ledger::DeliveryLedger;
use herald_settings::MAX_DIGEST_PERIOD_SECS;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blocking::with_ledger;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::errors::{DigestError, LedgerWriteFault};
use crate::halt::HaltSwitch;
use crate::metrics::DIGESTS_SEALED_TOTAL;

/// Result of one tick.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// The window would be empty or negative; nothing happened.
    Skipped,
    /// The window was sealed (with or without a digest email).
    Sealed(DigestWindow),
    /// Shutdown cancelled the digest before it was sent; the window stays
    /// open and the next run re-sends under the same key.
    Cancelled,
}

/// Periodic digest producer.
pub struct DigestScheduler {
    ledger: DeliveryLedger,
    dispatcher: Dispatcher,
    halt: HaltSwitch,
    period: Duration,
    tick_lock: Mutex<()>,
}

impl DigestScheduler {
    /// Scheduler ticking every `period`.
    pub fn new(
        ledger: DeliveryLedger,
        dispatcher: Dispatcher,
        halt: HaltSwitch,
        period: Duration,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            halt,
            period: period.clamp(
                Duration::from_millis(1),
                Duration::from_secs(MAX_DIGEST_PERIOD_SECS),
            ),
            tick_lock: Mutex::new(()),
        }
    }

    /// Tick period, clamped to `1ms..=365 days`.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one tick ending now.
    pub async fn tick(&self) -> Result<TickOutcome, DigestError> {
        self.tick_at(herald_core::now_millis()).await
    }

    /// Run one tick for the window ending at `now_ms`.
    ///
    /// Ticks are mutually exclusive. A ledger fault trips the halt switch and
    /// leaves the window unsealed.
    pub async fn tick_at(&self, now_ms: i64) -> Result<TickOutcome, DigestError> {
        if self.halt.is_halted() {
            return Err(DigestError::Halted);
        }
        let _lock = self.tick_lock.lock().await;

        match self.run_tick(now_ms).await {
            Ok(outcome) => Ok(outcome),
            Err(fault) => {
                let _ = self.halt.trip(&fault).await;
                Err(DigestError::Fault(fault))
            }
        }
    }

    async fn run_tick(&self, now_ms: i64) -> Result<TickOutcome, LedgerWriteFault> {
        let start_ms = with_ledger(&self.ledger, DeliveryLedger::last_sealed_end)
            .await?
            .unwrap_or(0);
        if now_ms <= start_ms {
            debug!(start_ms, now_ms, "digest window empty, skipping tick");
            return Ok(TickOutcome::Skipped);
        }

        // A digest delivered by an earlier process that died before sealing.
        let lookup = TaskId::for_digest(start_ms);
        if let Some(previous) = with_ledger(&self.ledger, move |l| l.delivered(&lookup)).await? {
            let window = window_from_record(start_ms, now_ms, &previous);
            info!(
                start_ms,
                end_ms = window.end_ms,
                "digest already delivered, sealing its window"
            );
            return self.seal(window).await.map(TickOutcome::Sealed);
        }

        let candidates =
            with_ledger(&self.ledger, move |l| l.digest_candidates(start_ms, now_ms)).await?;
        let mut window = DigestWindow::open(start_ms, now_ms);
        window.event_ids = candidates.iter().map(|r| r.event_id.clone()).collect();

        if candidates.is_empty() {
            debug!(start_ms, end_ms = now_ms, "no events in digest window");
            return self.seal(window).await.map(TickOutcome::Sealed);
        }

        let notification = summarize(&window, &candidates);
        let task = DeliveryTask::for_digest(start_ms, notification);
        window.task_id = Some(task.id.clone());

        match self.dispatcher.dispatch(task).await? {
            DispatchOutcome::Cancelled => {
                warn!(start_ms, "digest cancelled by shutdown, window left open");
                Ok(TickOutcome::Cancelled)
            }
            DispatchOutcome::AlreadyInFlight | DispatchOutcome::NotPending => {
                Ok(TickOutcome::Skipped)
            }
            outcome @ (DispatchOutcome::Delivered
            | DispatchOutcome::Abandoned
            | DispatchOutcome::AlreadyDelivered) => {
                info!(
                    start_ms,
                    end_ms = now_ms,
                    events = window.event_ids.len(),
                    ?outcome,
                    "digest dispatched"
                );
                self.seal(window).await.map(TickOutcome::Sealed)
            }
        }
    }

    async fn seal(&self, window: DigestWindow) -> Result<DigestWindow, LedgerWriteFault> {
        let sealed = with_ledger(&self.ledger, move |l| l.seal_window(&window)).await?;
        ::metrics::counter!(DIGESTS_SEALED_TOTAL).increment(1);
        Ok(sealed)
    }

    /// Tick every period until `shutdown` fires or the pipeline halts.
    ///
    /// The first tick happens one period after start.
    pub async fn run(&self, shutdown: CancellationToken) {
        let now = Instant::now();
        let first = now.checked_add(self.period).unwrap_or(now);
        let mut interval = tokio::time::interval_at(first, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = self.period.as_secs(), "digest scheduler started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.halt.halted() => break,
                _ = interval.tick() => match self.tick().await {
                    Ok(TickOutcome::Sealed(window)) => {
                        debug!(start_ms = window.start_ms, end_ms = window.end_ms, "digest window sealed");
                    }
                    Ok(TickOutcome::Skipped | TickOutcome::Cancelled) => {}
                    Err(e) => {
                        error!(error = %e, "digest scheduler stopping");
                        break;
                    }
                },
            }
        }
        info!("digest scheduler stopped");
    }
}

/// Rebuild the window a delivered digest covered from its recorded detail.
fn window_from_record(start_ms: i64, now_ms: i64, record: &LedgerRecord) -> DigestWindow {
    let end_ms = record
        .detail
        .get("windowEndMs")
        .and_then(Value::as_i64)
        .filter(|end| *end > start_ms)
        .unwrap_or(now_ms);
    let mut window = DigestWindow::open(start_ms, end_ms);
    window.event_ids = record
        .detail
        .get("events")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .filter_map(|e| e.get("eventId").and_then(Value::as_str))
                .map(EventId::from)
                .collect()
        })
        .unwrap_or_default();
    window.task_id = Some(record.task_id.clone());
    window
}

/// Render the digest for `records`, in ledger order.
pub fn summarize(window: &DigestWindow, records: &[LedgerRecord]) -> Notification {
    let field = |record: &LedgerRecord, key: &str| {
        record
            .detail
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string()
    };

    let mut lines = Vec::with_capacity(records.len());
    let mut events = Vec::with_capacity(records.len());
    for record in records {
        let tier = record.tier.map_or("?", |t| t.as_str());
        let policy = field(record, "policyName");
        let change = field(record, "changeType");
        let actor = field(record, "actor");
        let timestamp = field(record, "timestamp");
        lines.push(format!(
            "- [{tier}] '{policy}' {change} by {actor} at {timestamp} ({})",
            record.event_id
        ));
        events.push(json!({
            "eventId": record.event_id,
            "tier": record.tier,
            "policyName": policy,
            "changeType": change,
            "actor": actor,
            "timestamp": timestamp,
        }));
    }

    let count = records.len();
    let plural = if count == 1 { "" } else { "s" };
    Notification {
        subject: format!("Policy change digest: {count} change{plural}"),
        body: format!(
            "{count} lower-impact policy change{plural} recorded:\n{}",
            lines.join("\n")
        ),
        data: json!({
            "windowStartMs": window.start_ms,
            "windowEndMs": window.end_ms,
            "count": count,
            "events": events,
        }),
    }
}

/// Spawn [`DigestScheduler::run`] on the current runtime.
pub fn spawn(
    scheduler: Arc<DigestScheduler>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { scheduler.run(shutdown).await })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
