//! Email API adapter. Also carries digests.

use std::time::Duration;

use async_trait::async_trait;
use herald_core::{Channel, DeliveryTask};
use herald_settings::EmailSettings;
use serde_json::json;

use super::{AdapterError, ChannelAdapter, HttpTransport};

/// Sends one message to all configured recipients through the email API.
#[derive(Clone, Debug)]
pub struct EmailAdapter {
    transport: HttpTransport,
    settings: EmailSettings,
}

impl EmailAdapter {
    /// Adapter using `settings`.
    pub fn new(transport: HttpTransport, settings: EmailSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    async fn deliver(&self, task: &DeliveryTask) -> Result<(), AdapterError> {
        if self.settings.recipients.is_empty() {
            return Err(AdapterError::Permanent(
                "no email recipients configured".into(),
            ));
        }
        let body = json!({
            "from": self.settings.from,
            "to": self.settings.recipients,
            "subject": task.notification.subject,
            "text": task.notification.body,
            "metadata": {
                "taskId": task.id,
                "digest": task.id.is_digest(),
                "data": task.notification.data,
            },
        });
        self.transport
            .post_json(&self.settings.endpoint, task, &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::Notification;
    use herald_settings::HttpEndpointSettings;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn digest_task() -> DeliveryTask {
        DeliveryTask::for_digest(
            1_000,
            Notification {
                subject: "Policy digest: 2 changes".into(),
                body: "...".into(),
                data: serde_json::json!({"count": 2}),
            },
        )
    }

    fn adapter(url: String, recipients: Vec<String>) -> EmailAdapter {
        EmailAdapter::new(
            HttpTransport::new(Duration::from_secs(5)),
            EmailSettings {
                endpoint: HttpEndpointSettings {
                    url: Some(url),
                    auth_token: None,
                },
                from: "herald@example.com".into(),
                recipients,
            },
        )
    }

    #[tokio::test]
    async fn digest_is_marked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("idempotency-key", "digest:1000"))
            .and(body_partial_json(json!({
                "from": "herald@example.com",
                "to": ["ops@example.com"],
                "subject": "Policy digest: 2 changes",
                "metadata": {"digest": true},
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        adapter(server.uri(), vec!["ops@example.com".into()])
            .deliver(&digest_task())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_recipients_is_permanent() {
        let err = adapter("http://127.0.0.1:1".into(), vec![])
            .deliver(&digest_task())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
