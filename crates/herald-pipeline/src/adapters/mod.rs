//! # Channel Adapters
//!
//! One adapter per [`Channel`]. Adapters are stateless with respect to a
//! task: they perform a single delivery attempt and classify the outcome.
//! Retrying, backoff and ledger bookkeeping belong to the
//! [`Dispatcher`](crate::dispatch::Dispatcher).
//!
//! - [`WebhookAdapter`], [`SmsAdapter`], [`EmailAdapter`]: HTTP endpoints
//!   sharing one [`HttpTransport`]
//! - [`LedgerAdapter`]: appends the Delivered audit record

mod email;
mod http;
mod ledger;
mod sms;
mod webhook;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::{Channel, DeliveryTask};
use herald_ledger::DeliveryLedger;
use herald_settings::AdapterSettings;

pub use email::EmailAdapter;
pub use http::{HttpTransport, IDEMPOTENCY_KEY_HEADER};
pub use ledger::LedgerAdapter;
pub use sms::SmsAdapter;
pub use webhook::WebhookAdapter;

/// Per-attempt timeout when an adapter does not override it.
pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a failed delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Worth retrying (timeout, connection failure, 429, 5xx).
    #[error("transient failure: {reason}")]
    Transient {
        /// What went wrong.
        reason: String,
        /// Server-provided retry hint.
        retry_after_ms: Option<u64>,
    },

    /// Retrying cannot help (4xx, missing endpoint or recipients).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The ledger could not be written. Fatal to the pipeline.
    #[error("ledger write failed: {0}")]
    LedgerWrite(String),
}

impl AdapterError {
    /// Transient failure without a retry hint.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after_ms: None,
        }
    }

    /// Whether the dispatcher should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Transient { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// Human-readable reason, without the category prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. } => reason,
            Self::Permanent(reason) | Self::LedgerWrite(reason) => reason,
        }
    }
}

/// A notification channel.
///
/// Implementors must be `Send + Sync`; one instance serves every task of its
/// channel concurrently.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel served by this adapter.
    fn channel(&self) -> Channel;

    /// Upper bound on a single attempt.
    fn timeout(&self) -> Duration {
        DEFAULT_ADAPTER_TIMEOUT
    }

    /// Make one delivery attempt. Must be idempotent on `task.id`.
    async fn deliver(&self, task: &DeliveryTask) -> Result<(), AdapterError>;
}

/// The adapter registered for each channel.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: BTreeMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl AdapterSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter`, replacing any adapter of the same channel.
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    /// Register `adapter`, replacing any adapter of the same channel.
    pub fn insert(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let _ = self.adapters.insert(adapter.channel(), adapter);
    }

    /// Adapter for `channel`.
    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel)
    }

    /// Registered channels.
    pub fn channels(&self) -> Vec<Channel> {
        self.adapters.keys().copied().collect()
    }

    /// The production adapters: HTTP channels from `settings`, ledger
    /// channel over `ledger`.
    pub fn from_settings(settings: &AdapterSettings, ledger: DeliveryLedger) -> Self {
        let transport = HttpTransport::new(Duration::from_millis(settings.timeout_ms));
        Self::new()
            .with(Arc::new(WebhookAdapter::new(
                transport.clone(),
                settings.webhook.clone(),
            )))
            .with(Arc::new(SmsAdapter::new(transport.clone(), settings.sms.clone())))
            .with(Arc::new(EmailAdapter::new(transport, settings.email.clone())))
            .with(Arc::new(LedgerAdapter::new(ledger)))
    }
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSet")
            .field("channels", &self.channels())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use herald_ledger::ConnectionConfig;

    struct Noop(Channel);

    #[async_trait]
    impl ChannelAdapter for Noop {
        fn channel(&self) -> Channel {
            self.0
        }

        async fn deliver(&self, _task: &DeliveryTask) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[test]
    fn error_classification() {
        let err = AdapterError::Transient {
            reason: "503".into(),
            retry_after_ms: Some(2_000),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(2_000));
        assert_eq!(err.reason(), "503");

        let err = AdapterError::Permanent("404".into());
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after_ms(), None);
        assert_eq!(err.to_string(), "permanent failure: 404");

        assert!(!AdapterError::LedgerWrite("disk".into()).is_retryable());
    }

    #[test]
    fn default_timeout_is_ten_seconds() {
        assert_eq!(Noop(Channel::Sms).timeout(), Duration::from_secs(10));
    }

    #[test]
    fn set_replaces_by_channel() {
        let set = AdapterSet::new()
            .with(Arc::new(Noop(Channel::Sms)))
            .with(Arc::new(Noop(Channel::Sms)))
            .with(Arc::new(Noop(Channel::Webhook)));
        assert_eq!(set.channels(), vec![Channel::Webhook, Channel::Sms]);
        assert!(set.get(Channel::Email).is_none());
    }

    #[test]
    fn production_set_covers_every_channel() {
        let dir = tempfile::tempdir().unwrap();
        let ledger =
            DeliveryLedger::open(dir.path().join("ledger.db"), &ConnectionConfig::default())
                .unwrap();
        let set = AdapterSet::from_settings(&AdapterSettings::default(), ledger);
        assert_eq!(set.channels(), Channel::ALL.to_vec());
        assert_eq!(
            set.get(Channel::Webhook).unwrap().timeout(),
            Duration::from_secs(10)
        );
    }
}
