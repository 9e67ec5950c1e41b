//! The `Pipeline` orchestrator.
//!
//! Per event: ingest → classify → route, synchronously within
//! [`Pipeline::submit_event`], then one tracked tokio task per delivery
//! channel. The caller gets the plan back without waiting for adapters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use herald_core::{ClassifiedEvent, DeliveryTask, EventId, ImpactTier, TaskId};
use herald_ledger::DeliveryLedger;
use herald_settings::HeraldSettings;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::adapters::AdapterSet;
use crate::alerts::{AlertSink, LedgerAlertSink};
use crate::blocking::with_ledger;
use crate::classify::{Classifier, WeightTable};
use crate::digest::DigestScheduler;
use crate::dispatch::Dispatcher;
use crate::errors::{IngestError, LedgerWriteFault, SubmitError};
use crate::halt::HaltSwitch;
use crate::ingest::{Ingestor, RawEvent};
use crate::metrics::{EVENTS_INGESTED_TOTAL, EVENTS_REJECTED_TOTAL};
use crate::route::{RoutePlan, Router, RoutingTable};

/// An event accepted for delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    /// Event id.
    pub event_id: EventId,
    /// Ingestion sequence.
    pub sequence: i64,
    /// Computed tier.
    pub tier: ImpactTier,
    /// Tasks emitted for immediate delivery.
    pub tasks: Vec<TaskId>,
    /// Whether the event goes into the next digest.
    pub deferred_to_digest: bool,
}

struct Inner {
    ingestor: Ingestor,
    classifier: Classifier,
    router: Router,
    dispatcher: Dispatcher,
    ledger: DeliveryLedger,
    halt: HaltSwitch,
    tracker: TaskTracker,
    active: Arc<watch::Sender<usize>>,
    shutdown: CancellationToken,
}

/// Events scanned per ledger read during [`Pipeline::recover`].
const RECOVERY_PAGE: u32 = 500;

/// Outcome of [`Pipeline::recover`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Ingested events inspected.
    pub scanned: usize,
    /// Events with at least one unsettled task.
    pub resumed_events: usize,
    /// Tasks dispatched again.
    pub resumed_tasks: usize,
}

/// Decrements the running-dispatch count when a spawned dispatch ends.
struct ActiveGuard(Arc<watch::Sender<usize>>);

impl ActiveGuard {
    fn enter(active: &Arc<watch::Sender<usize>>) -> Self {
        active.send_modify(|n| *n += 1);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// The notification pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    /// Start building a pipeline over `ledger`.
    pub fn builder(ledger: DeliveryLedger) -> PipelineBuilder {
        PipelineBuilder {
            ledger,
            settings: HeraldSettings::default(),
            adapters: None,
            alerts: None,
            shutdown: None,
        }
    }

    /// Accept one event.
    ///
    /// Returns once the event is recorded in the ingest log and its tasks are
    /// spawned. Rejected events have no side effects.
    pub async fn submit_event(&self, raw: &RawEvent) -> Result<Accepted, SubmitError> {
        self.ensure_running()?;

        let ingested = match self.inner.ingestor.ingest(raw, Utc::now()).await {
            Ok(ingested) => ingested,
            Err(IngestError::Validation(e)) => {
                ::metrics::counter!(EVENTS_REJECTED_TOTAL, "reason" => e.code()).increment(1);
                debug!(error = %e, "event rejected");
                return Err(SubmitError::Rejected(e));
            }
            Err(IngestError::Fault(fault)) => return Err(self.fault(fault).await),
        };
        ::metrics::counter!(EVENTS_INGESTED_TOTAL).increment(1);

        let classified = self
            .inner
            .classifier
            .classify(ingested.event, ingested.sequence);
        Ok(self.emit(&classified))
    }

    /// Re-run classification and routing for an already ingested event.
    ///
    /// Tasks the ledger shows as Delivered are skipped by the dispatcher, so
    /// only abandoned or never-finished channels are attempted again.
    pub async fn replay(&self, event_id: &EventId) -> Result<Accepted, SubmitError> {
        self.ensure_running()?;

        let id = event_id.clone();
        let stored = match with_ledger(&self.inner.ledger, move |l| l.ingested_event(&id)).await {
            Ok(stored) => stored,
            Err(fault) => return Err(self.fault(fault).await),
        };
        let Some((sequence, event)) = stored else {
            return Err(SubmitError::UnknownEvent(event_id.clone()));
        };
        info!(event_id = %event_id, sequence, "replaying event");
        let classified = self.inner.classifier.classify(event, sequence);
        Ok(self.emit(&classified))
    }

    /// Resume delivery of events accepted by an earlier process.
    ///
    /// Walks the ingest log, re-derives each event's tasks and dispatches
    /// those without a Delivered or Abandoned record. Run once at startup,
    /// before accepting new events.
    pub async fn recover(&self) -> Result<Recovery, SubmitError> {
        self.ensure_running()?;

        let mut recovery = Recovery::default();
        let mut after = 0;
        loop {
            let page =
                match with_ledger(&self.inner.ledger, move |l| l.ingested_page(after, RECOVERY_PAGE))
                    .await
                {
                    Ok(page) => page,
                    Err(fault) => return Err(self.fault(fault).await),
                };
            let Some(last) = page.last() else { break };
            after = last.sequence;

            for entry in page {
                recovery.scanned += 1;
                let classified = self.inner.classifier.classify(entry.event, entry.sequence);
                let unsettled: Vec<DeliveryTask> = self
                    .inner
                    .router
                    .route(&classified)
                    .tasks
                    .into_iter()
                    .filter(|task| entry.settled.binary_search(&task.id).is_err())
                    .collect();
                if unsettled.is_empty() {
                    continue;
                }
                info!(
                    event_id = %classified.id(),
                    sequence = classified.sequence,
                    tasks = unsettled.len(),
                    "resuming unfinished event"
                );
                recovery.resumed_events += 1;
                recovery.resumed_tasks += unsettled.len();
                self.spawn_dispatches(unsettled);
            }
        }

        info!(
            scanned = recovery.scanned,
            resumed_events = recovery.resumed_events,
            resumed_tasks = recovery.resumed_tasks,
            "ingest log recovery finished"
        );
        Ok(recovery)
    }

    fn ensure_running(&self) -> Result<(), SubmitError> {
        match self.inner.halt.reason() {
            Some(reason) => Err(SubmitError::Halted { reason }),
            None => Ok(()),
        }
    }

    async fn fault(&self, fault: LedgerWriteFault) -> SubmitError {
        let _ = self.inner.halt.trip(&fault).await;
        SubmitError::Fault(fault)
    }

    fn emit(&self, classified: &ClassifiedEvent) -> Accepted {
        let RoutePlan {
            tasks,
            deferred_to_digest,
        } = self.inner.router.route(classified);
        info!(
            event_id = %classified.id(),
            sequence = classified.sequence,
            tier = %classified.tier,
            tasks = tasks.len(),
            deferred_to_digest,
            "event routed"
        );

        let task_ids = tasks.iter().map(|t| t.id.clone()).collect();
        self.spawn_dispatches(tasks);

        Accepted {
            event_id: classified.id().clone(),
            sequence: classified.sequence,
            tier: classified.tier,
            tasks: task_ids,
            deferred_to_digest,
        }
    }

    fn spawn_dispatches(&self, tasks: Vec<DeliveryTask>) {
        for task in tasks {
            let dispatcher = self.inner.dispatcher.clone();
            let halt = self.inner.halt.clone();
            let guard = ActiveGuard::enter(&self.inner.active);
            let _ = self.inner.tracker.spawn(async move {
                let _guard = guard;
                let task_id = task.id.clone();
                match dispatcher.dispatch(task).await {
                    Ok(outcome) => debug!(task_id = %task_id, ?outcome, "dispatch finished"),
                    Err(fault) => {
                        let _ = halt.trip(&fault).await;
                    }
                }
            });
        }
    }

    /// Digest scheduler sharing this pipeline's ledger, dispatcher and halt switch.
    pub fn digest_scheduler(&self, period: Duration) -> DigestScheduler {
        DigestScheduler::new(
            self.inner.ledger.clone(),
            self.inner.dispatcher.clone(),
            self.inner.halt.clone(),
            period,
        )
    }

    /// The ledger.
    pub fn ledger(&self) -> &DeliveryLedger {
        &self.inner.ledger
    }

    /// The halt switch.
    pub fn halt(&self) -> &HaltSwitch {
        &self.inner.halt
    }

    /// Whether a ledger fault halted the pipeline.
    pub fn is_halted(&self) -> bool {
        self.inner.halt.is_halted()
    }

    /// Token cancelling not-yet-attempted deliveries.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Number of delivery tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Wait until no spawned delivery task is running.
    ///
    /// Leaves the tracker untouched, so it is safe alongside [`Self::shutdown`].
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.active.subscribe();
        let _ = idle.wait_for(|running| *running == 0).await;
    }

    /// Cancel pending deliveries and drain running ones for up to `timeout`.
    /// Returns `true` if everything finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutdown.cancel();
        let _ = self.inner.tracker.close();
        info!(
            pending = self.inner.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "draining delivery tasks"
        );
        tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok()
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    ledger: DeliveryLedger,
    settings: HeraldSettings,
    adapters: Option<AdapterSet>,
    alerts: Option<Arc<dyn AlertSink>>,
    shutdown: Option<CancellationToken>,
}

impl PipelineBuilder {
    /// Use `settings` for ingest, classification, routing, retry and adapters.
    #[must_use]
    pub fn settings(mut self, settings: &HeraldSettings) -> Self {
        self.settings = settings.clone();
        self
    }

    /// Replace the adapters built from settings.
    #[must_use]
    pub fn adapters(mut self, adapters: AdapterSet) -> Self {
        self.adapters = Some(adapters);
        self
    }

    /// Replace the ledger-backed alert sink.
    #[must_use]
    pub fn alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Use an existing shutdown token.
    #[must_use]
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Build the pipeline.
    pub fn build(self) -> Pipeline {
        let Self {
            ledger,
            settings,
            adapters,
            alerts,
            shutdown,
        } = self;
        let adapters = adapters
            .unwrap_or_else(|| AdapterSet::from_settings(&settings.adapters, ledger.clone()));
        let alerts = alerts.unwrap_or_else(|| Arc::new(LedgerAlertSink::new(ledger.clone())));
        let shutdown = shutdown.unwrap_or_default();

        let table = WeightTable::from_settings(&settings.classifier);
        debug!(weights = table.len(), "classifier weight table loaded");

        Pipeline {
            inner: Arc::new(Inner {
                ingestor: Ingestor::new(ledger.clone(), settings.ingest.clock_skew_ms),
                classifier: Classifier::new(table),
                router: Router::new(RoutingTable::from_settings(&settings.routing)),
                dispatcher: Dispatcher::new(
                    adapters,
                    ledger.clone(),
                    settings.retry.clone(),
                    alerts.clone(),
                    shutdown.clone(),
                ),
                ledger,
                halt: HaltSwitch::new(alerts),
                tracker: TaskTracker::new(),
                active: Arc::new(watch::Sender::new(0)),
                shutdown,
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
