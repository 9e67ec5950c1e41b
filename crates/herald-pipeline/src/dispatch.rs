//! # Dispatcher
//!
//! Drives one [`DeliveryTask`] through its state machine:
//!
//! ```text
//! Pending ──► InFlight ──► Delivered
//!    │          │  ▲
//!    │          ▼  │ backoff
//!    │        Failed
//!    │          │
//!    └──────────┴──► Abandoned
//! ```
//!
//! 1. Refuses a task id that is already being dispatched
//! 2. Skips tasks the ledger already shows as Delivered
//! 3. Abandons with reason `"cancelled"` if shutdown began before the first
//!    attempt
//! 4. Retries transient failures with exponential backoff until
//!    `max_attempts`; permanent failures abandon immediately
//! 5. Appends the terminal state to the ledger and alerts the operator once
//!    per abandoned task
//!
//! An attempt that has started always runs to completion or to its timeout.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use herald_core::{
    DeliveryStatus, DeliveryTask, NewLedgerRecord, OperatorAlert, RetryConfig, TaskId,
};
use herald_ledger::{AppendOutcome, DeliveryLedger};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{AdapterError, AdapterSet};
use crate::alerts::AlertSink;
use crate::blocking::with_ledger;
use crate::errors::LedgerWriteFault;
use crate::metrics::{DELIVERIES_TOTAL, DELIVERY_ATTEMPTS_TOTAL};

/// Failure reason of a task cancelled before its first attempt.
pub const CANCELLED_REASON: &str = "cancelled";

/// How a dispatch ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The adapter accepted the task.
    Delivered,
    /// Gave up after a permanent failure or exhausted retries.
    Abandoned,
    /// Shutdown began before the first attempt; recorded as Abandoned.
    Cancelled,
    /// The ledger already shows the task Delivered; nothing was sent.
    AlreadyDelivered,
    /// Another worker is dispatching the same task id.
    AlreadyInFlight,
    /// The task was not `Pending`; nothing was done.
    NotPending,
}

/// Removes the task id from the in-flight set when dropped.
struct InFlightGuard {
    set: Arc<DashSet<TaskId>>,
    id: TaskId,
}

impl InFlightGuard {
    fn acquire(set: &Arc<DashSet<TaskId>>, id: &TaskId) -> Option<Self> {
        set.insert(id.clone()).then(|| Self {
            set: Arc::clone(set),
            id: id.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let _ = self.set.remove(&self.id);
    }
}

/// Retrying, idempotent task executor. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    adapters: AdapterSet,
    ledger: DeliveryLedger,
    retry: RetryConfig,
    alerts: Arc<dyn AlertSink>,
    in_flight: Arc<DashSet<TaskId>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Dispatcher over `adapters`. Tasks not yet attempted when `cancel`
    /// fires are abandoned.
    pub fn new(
        adapters: AdapterSet,
        ledger: DeliveryLedger,
        retry: RetryConfig,
        alerts: Arc<dyn AlertSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            adapters,
            ledger,
            retry,
            alerts,
            in_flight: Arc::new(DashSet::new()),
            cancel,
        }
    }

    /// Registered adapters.
    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Whether `task_id` is currently being dispatched.
    pub fn is_in_flight(&self, task_id: &TaskId) -> bool {
        self.in_flight.contains(task_id)
    }

    /// Run `task` to a terminal state.
    ///
    /// Returns `Err` only when the ledger cannot be read or written, in which
    /// case the terminal state may not have been recorded.
    pub async fn dispatch(
        &self,
        mut task: DeliveryTask,
    ) -> Result<DispatchOutcome, LedgerWriteFault> {
        if task.status != DeliveryStatus::Pending {
            warn!(task_id = %task.id, status = %task.status, "refusing to dispatch non-pending task");
            return Ok(DispatchOutcome::NotPending);
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &task.id) else {
            debug!(task_id = %task.id, "task already in flight");
            return Ok(DispatchOutcome::AlreadyInFlight);
        };

        let id = task.id.clone();
        if with_ledger(&self.ledger, move |l| l.delivered(&id)).await?.is_some() {
            debug!(task_id = %task.id, "task already delivered, skipping");
            return Ok(DispatchOutcome::AlreadyDelivered);
        }

        if self.cancel.is_cancelled() {
            advance(&mut task, DeliveryStatus::Abandoned, Some(CANCELLED_REASON.into()));
            self.finish(&task).await?;
            return Ok(DispatchOutcome::Cancelled);
        }

        let Some(adapter) = self.adapters.get(task.channel).cloned() else {
            let reason = format!("no adapter registered for channel {}", task.channel);
            advance(&mut task, DeliveryStatus::Abandoned, Some(reason));
            self.finish(&task).await?;
            return Ok(DispatchOutcome::Abandoned);
        };

        loop {
            advance(&mut task, DeliveryStatus::InFlight, None);
            ::metrics::counter!(DELIVERY_ATTEMPTS_TOTAL, "channel" => task.channel.as_str())
                .increment(1);
            debug!(task_id = %task.id, channel = %task.channel, attempt = task.attempts, "delivery attempt");

            let timeout = adapter.timeout();
            let result = match tokio::time::timeout(timeout, adapter.deliver(&task)).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::transient(format!(
                    "attempt timed out after {}ms",
                    timeout.as_millis()
                ))),
            };

            match result {
                Ok(()) => {
                    advance(&mut task, DeliveryStatus::Delivered, None);
                    break;
                }
                Err(AdapterError::LedgerWrite(message)) => {
                    return Err(LedgerWriteFault::new(message));
                }
                Err(err) if err.is_retryable() && task.attempts < self.retry.max_attempts => {
                    advance(&mut task, DeliveryStatus::Failed, Some(err.to_string()));
                    let delay_ms = self.retry.delay_ms(
                        task.attempts.saturating_sub(1),
                        err.retry_after_ms(),
                        rand::random(),
                    );
                    warn!(
                        task_id = %task.id,
                        channel = %task.channel,
                        attempt = task.attempts,
                        max_attempts = self.retry.max_attempts,
                        delay_ms,
                        error = %err,
                        "delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(err) => {
                    advance(&mut task, DeliveryStatus::Abandoned, Some(err.to_string()));
                    break;
                }
            }
        }

        self.finish(&task).await?;
        Ok(match task.status {
            DeliveryStatus::Delivered => DispatchOutcome::Delivered,
            _ => DispatchOutcome::Abandoned,
        })
    }

    /// Record the terminal state, then alert on abandonment.
    async fn finish(&self, task: &DeliveryTask) -> Result<(), LedgerWriteFault> {
        let record = NewLedgerRecord::from_task(task);
        let outcome = with_ledger(&self.ledger, move |l| l.append(&record)).await?;
        if let AppendOutcome::AlreadyDelivered(existing) = &outcome {
            debug!(task_id = %task.id, sequence = existing.sequence, "terminal record already present");
        }
        ::metrics::counter!(
            DELIVERIES_TOTAL,
            "channel" => task.channel.as_str(),
            "status" => task.status.as_str()
        )
        .increment(1);

        if task.status == DeliveryStatus::Abandoned {
            error!(
                task_id = %task.id,
                channel = %task.channel,
                attempts = task.attempts,
                reason = task.last_error.as_deref().unwrap_or(""),
                "delivery abandoned"
            );
            let _ = self.alerts.raise(OperatorAlert::task_abandoned(task)).await?;
        } else {
            info!(task_id = %task.id, channel = %task.channel, attempts = task.attempts, "delivered");
        }
        Ok(())
    }
}

fn advance(task: &mut DeliveryTask, to: DeliveryStatus, reason: Option<String>) {
    let result = match reason {
        Some(reason) => task.fail(to, reason),
        None => task.transition(to),
    };
    if let Err(e) = result {
        error!(task_id = %task.id, error = %e, "illegal task transition");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ChannelAdapter;
    use crate::alerts::LedgerAlertSink;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use herald_core::{AlertKind, Channel, ChangeType, ClassifiedEvent, ImpactTier, PolicyChangeEvent};
    use herald_ledger::ConnectionConfig;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Replays a script of results; succeeds once the script runs out.
    struct Scripted {
        channel: Channel,
        script: Mutex<VecDeque<Result<(), AdapterError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl Scripted {
        fn new(channel: Channel, script: Vec<Result<(), AdapterError>>) -> Arc<Self> {
            Arc::new(Self {
                channel,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelAdapter for Scripted {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        async fn deliver(&self, _task: &DeliveryTask) -> Result<(), AdapterError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter_factor: 0.0,
        }
    }

    fn setup(adapter: Arc<dyn ChannelAdapter>) -> (TempDir, DeliveryLedger, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let ledger =
            DeliveryLedger::open(dir.path().join("ledger.db"), &ConnectionConfig::default())
                .unwrap();
        let dispatcher = Dispatcher::new(
            AdapterSet::new().with(adapter),
            ledger.clone(),
            fast_retry(),
            Arc::new(LedgerAlertSink::new(ledger.clone())),
            CancellationToken::new(),
        );
        (dir, ledger, dispatcher)
    }

    fn task(channel: Channel) -> DeliveryTask {
        let classified = ClassifiedEvent {
            event: PolicyChangeEvent {
                id: "p1".into(),
                policy_name: "access-control".into(),
                change_type: ChangeType::Updated,
                actor: "alice".into(),
                timestamp: chrono::Utc::now(),
                diff: serde_json::Value::Null,
                severity_hint: Some(ImpactTier::High),
            },
            tier: ImpactTier::High,
            sequence: 1,
        };
        DeliveryTask::for_event(&classified, channel)
    }

    fn transient() -> Result<(), AdapterError> {
        Err(AdapterError::transient("HTTP 503"))
    }

    #[tokio::test]
    async fn delivers_after_transient_failures() {
        let adapter = Scripted::new(Channel::Webhook, vec![transient(), transient()]);
        let (_dir, ledger, dispatcher) = setup(adapter.clone());

        let outcome = dispatcher.dispatch(task(Channel::Webhook)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(adapter.calls(), 3);

        let records = ledger.query(&"p1".into()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DeliveryStatus::Delivered);
        assert_eq!(records[0].attempts, 3);
        assert!(ledger.alerts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandons_after_max_attempts() {
        let adapter = Scripted::new(Channel::Webhook, vec![transient(); 5]);
        let (_dir, ledger, dispatcher) = setup(adapter.clone());

        let outcome = dispatcher.dispatch(task(Channel::Webhook)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Abandoned);
        assert_eq!(adapter.calls(), 5);

        let records = ledger.query(&"p1".into()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DeliveryStatus::Abandoned);
        assert_eq!(records[0].attempts, 5);

        let alerts = ledger.alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::TaskAbandoned);
        assert_eq!(alerts[0].task_id.as_ref().unwrap().as_str(), "p1:webhook");
    }

    #[tokio::test]
    async fn permanent_failure_abandons_immediately() {
        let adapter = Scripted::new(
            Channel::Sms,
            vec![Err(AdapterError::Permanent("HTTP 400".into()))],
        );
        let (_dir, ledger, dispatcher) = setup(adapter.clone());

        let outcome = dispatcher.dispatch(task(Channel::Sms)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Abandoned);
        assert_eq!(adapter.calls(), 1);
        let records = ledger.query(&"p1".into()).unwrap();
        assert_eq!(
            records[0].reason.as_deref(),
            Some("permanent failure: HTTP 400")
        );
    }

    #[tokio::test]
    async fn timeout_counts_as_transient() {
        let adapter = Arc::new(Scripted {
            channel: Channel::Email,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(500),
        });
        let (_dir, ledger, dispatcher) = setup(adapter.clone());

        let outcome = dispatcher.dispatch(task(Channel::Email)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Abandoned);
        assert_eq!(adapter.calls(), 5);
        let records = ledger.query(&"p1".into()).unwrap();
        assert!(records[0].reason.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn delivered_task_is_not_resent() {
        let adapter = Scripted::new(Channel::Webhook, vec![]);
        let (_dir, _ledger, dispatcher) = setup(adapter.clone());

        assert_eq!(
            dispatcher.dispatch(task(Channel::Webhook)).await.unwrap(),
            DispatchOutcome::Delivered
        );
        assert_eq!(
            dispatcher.dispatch(task(Channel::Webhook)).await.unwrap(),
            DispatchOutcome::AlreadyDelivered
        );
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let adapter = Scripted::new(Channel::Webhook, vec![]);
        let (_dir, ledger, dispatcher) = setup(adapter.clone());
        dispatcher.cancel.cancel();

        let outcome = dispatcher.dispatch(task(Channel::Webhook)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Cancelled);
        assert_eq!(adapter.calls(), 0);

        let records = ledger.query(&"p1".into()).unwrap();
        assert_eq!(records[0].status, DeliveryStatus::Abandoned);
        assert_eq!(records[0].reason.as_deref(), Some(CANCELLED_REASON));
        assert_eq!(records[0].attempts, 0);
    }

    #[tokio::test]
    async fn concurrent_dispatch_of_same_task_is_refused() {
        let adapter = Arc::new(Scripted {
            channel: Channel::Webhook,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(20),
        });
        let (_dir, _ledger, dispatcher) = setup(adapter.clone());

        let (a, b) = tokio::join!(
            dispatcher.dispatch(task(Channel::Webhook)),
            dispatcher.dispatch(task(Channel::Webhook)),
        );
        let mut outcomes = [a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| format!("{o:?}"));
        assert_eq!(
            outcomes,
            [DispatchOutcome::AlreadyInFlight, DispatchOutcome::Delivered]
        );
        assert_eq!(adapter.calls(), 1);
        assert!(!dispatcher.is_in_flight(&"p1:webhook".into()));
    }

    #[tokio::test]
    async fn missing_adapter_abandons() {
        let adapter = Scripted::new(Channel::Webhook, vec![]);
        let (_dir, ledger, dispatcher) = setup(adapter);

        let outcome = dispatcher.dispatch(task(Channel::Sms)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Abandoned);
        assert_eq!(ledger.alerts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ledger_write_error_is_a_fault() {
        let adapter = Scripted::new(
            Channel::Ledger,
            vec![Err(AdapterError::LedgerWrite("disk I/O error".into()))],
        );
        let (_dir, _ledger, dispatcher) = setup(adapter);

        let fault = dispatcher.dispatch(task(Channel::Ledger)).await.unwrap_err();
        assert_eq!(fault.message, "disk I/O error");
    }

    #[tokio::test]
    async fn non_pending_task_is_refused() {
        let adapter = Scripted::new(Channel::Webhook, vec![]);
        let (_dir, _ledger, dispatcher) = setup(adapter.clone());
        let mut t = task(Channel::Webhook);
        t.transition(DeliveryStatus::InFlight).unwrap();

        assert_matches!(dispatcher.dispatch(t).await, Ok(DispatchOutcome::NotPending));
        assert_eq!(adapter.calls(), 0);
    }
}
