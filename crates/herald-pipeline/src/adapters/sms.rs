//! SMS gateway adapter.

use std::time::Duration;

use async_trait::async_trait;
use herald_core::{Channel, DeliveryTask};
use herald_settings::SmsSettings;
use serde_json::json;

use super::{AdapterError, ChannelAdapter, HttpTransport};

/// Longest message sent in a single SMS.
pub const MAX_SMS_CHARS: usize = 160;

/// Sends the notification subject to every configured phone number through
/// one gateway request.
#[derive(Clone, Debug)]
pub struct SmsAdapter {
    transport: HttpTransport,
    settings: SmsSettings,
}

impl SmsAdapter {
    /// Adapter using `settings`.
    pub fn new(transport: HttpTransport, settings: SmsSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    async fn deliver(&self, task: &DeliveryTask) -> Result<(), AdapterError> {
        if self.settings.recipients.is_empty() {
            return Err(AdapterError::Permanent("no sms recipients configured".into()));
        }
        let body = json!({
            "to": self.settings.recipients,
            "message": truncate(&task.notification.subject, MAX_SMS_CHARS),
            "reference": task.id,
        });
        self.transport
            .post_json(&self.settings.endpoint, task, &body)
            .await
    }
}
