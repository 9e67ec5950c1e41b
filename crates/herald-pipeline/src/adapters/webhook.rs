//! Webhook adapter: POSTs the notification envelope to one URL.

use std::time::Duration;

use async_trait::async_trait;
use herald_core::{Channel, DeliveryTask};
use herald_settings::HttpEndpointSettings;
use serde_json::{Value, json};

use super::{AdapterError, ChannelAdapter, HttpTransport};

/// Delivers to the configured webhook URL.
#[derive(Clone, Debug)]
pub struct WebhookAdapter {
    transport: HttpTransport,
    endpoint: HttpEndpointSettings,
}

impl WebhookAdapter {
    /// Adapter posting to `endpoint`.
    pub fn new(transport: HttpTransport, endpoint: HttpEndpointSettings) -> Self {
        Self {
            transport,
            endpoint,
        }
    }

    fn payload(task: &DeliveryTask) -> Value {
        json!({
            "taskId": task.id,
            "eventId": task.event_id,
            "tier": task.tier,
            "contentHash": task.content_hash,
            "subject": task.notification.subject,
            "body": task.notification.body,
            "data": task.notification.data,
        })
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    async fn deliver(&self, task: &DeliveryTask) -> Result<(), AdapterError> {
        self.transport
            .post_json(&self.endpoint, task, &Self::payload(task))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{ChangeType, ClassifiedEvent, ImpactTier, PolicyChangeEvent};
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task() -> DeliveryTask {
        let classified = ClassifiedEvent {
            event: PolicyChangeEvent {
                id: "p1".into(),
                policy_name: "access-control".into(),
                change_type: ChangeType::Updated,
                actor: "alice".into(),
                timestamp: chrono::Utc::now(),
                diff: Value::Null,
                severity_hint: Some(ImpactTier::High),
            },
            tier: ImpactTier::High,
            sequence: 1,
        };
        DeliveryTask::for_event(&classified, Channel::Webhook)
    }

    #[tokio::test]
    async fn posts_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "taskId": "p1:webhook",
                "eventId": "p1",
                "tier": "high",
                "data": {"policyName": "access-control"},
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(
            HttpTransport::new(Duration::from_secs(5)),
            HttpEndpointSettings {
                url: Some(server.uri()),
                auth_token: None,
            },
        );
        assert_eq!(adapter.channel(), Channel::Webhook);
        adapter.deliver(&task()).await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(
            HttpTransport::new(Duration::from_secs(5)),
            HttpEndpointSettings {
                url: Some(server.uri()),
                auth_token: None,
            },
        );
        assert!(adapter.deliver(&task()).await.unwrap_err().is_retryable());
    }
}
