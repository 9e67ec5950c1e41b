//! Shared fixtures: recording fake adapters and a file-backed pipeline.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use herald_core::{Channel, DeliveryTask, RetryConfig};
use herald_ledger::{ConnectionConfig, DeliveryLedger};
use herald_pipeline::{AdapterError, AdapterSet, ChannelAdapter, Pipeline, RawEvent};
use herald_pipeline::adapters::LedgerAdapter;
use herald_settings::HeraldSettings;
use parking_lot::Mutex;
use tempfile::TempDir;

/// Fake user-facing channel. Fails transiently `failures` times, then
/// records every delivered task.
pub struct Recorder {
    channel: Channel,
    failures: AtomicU32,
    calls: AtomicU32,
    delivered: Mutex<Vec<DeliveryTask>>,
}

impl Recorder {
    pub fn new(channel: Channel) -> Arc<Self> {
        Self::failing(channel, 0)
    }

    pub fn failing(channel: Channel, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            channel,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<DeliveryTask> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl ChannelAdapter for Recorder {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn deliver(&self, task: &DeliveryTask) -> Result<(), AdapterError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AdapterError::transient("HTTP 503"));
        }
        self.delivered.lock().push(task.clone());
        Ok(())
    }
}

/// Settings with millisecond backoff so retry tests finish quickly.
pub fn fast_settings() -> HeraldSettings {
    HeraldSettings {
        retry: RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1,
            max_delay_ms: 8,
            jitter_factor: 0.0,
        },
        ..Default::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub pipeline: Pipeline,
    pub webhook: Arc<Recorder>,
    pub sms: Arc<Recorder>,
    pub email: Arc<Recorder>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_webhook_failures(0)
    }

    pub fn with_webhook_failures(failures: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, webhook, sms, email) =
            build(&db_path(dir.path()), Recorder::failing(Channel::Webhook, failures));
        Self {
            dir,
            pipeline,
            webhook,
            sms,
            email,
        }
    }

    /// A fresh process over the same database file.
    pub fn restart(self) -> Self {
        let dir = self.dir;
        drop(self.pipeline);
        let (pipeline, webhook, sms, email) =
            build(&db_path(dir.path()), Recorder::new(Channel::Webhook));
        Self {
            dir,
            pipeline,
            webhook,
            sms,
            email,
        }
    }

    pub fn ledger(&self) -> &DeliveryLedger {
        self.pipeline.ledger()
    }
}

fn db_path(dir: &Path) -> PathBuf {
    dir.join("ledger.db")
}

fn build(
    path: &Path,
    webhook: Arc<Recorder>,
) -> (Pipeline, Arc<Recorder>, Arc<Recorder>, Arc<Recorder>) {
    let ledger = DeliveryLedger::open(path, &ConnectionConfig::default()).unwrap();
    let sms = Recorder::new(Channel::Sms);
    let email = Recorder::new(Channel::Email);
    let adapters = AdapterSet::new()
        .with(webhook.clone())
        .with(sms.clone())
        .with(email.clone())
        .with(Arc::new(LedgerAdapter::new(ledger.clone())));
    let pipeline = Pipeline::builder(ledger)
        .settings(&fast_settings())
        .adapters(adapters)
        .build();
    (pipeline, webhook, sms, email)
}

pub fn event(id: &str, policy: &str, change: &str, hint: Option<&str>) -> RawEvent {
    RawEvent {
        id: Some(id.into()),
        policy: Some(policy.into()),
        change: Some(change.into()),
        actor: Some("alice".into()),
        timestamp: Some(Utc::now().to_rfc3339()),
        diff: Some(serde_json::json!({"rules": ["allow *"]})),
        hint: hint.map(Into::into),
    }
}
