//! Notification transports used by `govern worker`.

use std::time::Duration;

use async_trait::async_trait;
use govern_core::collab::NotificationTransport;
use govern_core::error::Result;
use govern_core::outbox::OutboxMessage;

use crate::executor::post_json;

/// Posts each message as JSON to a webhook. Receivers should dedupe on
/// `id`, since delivery is at least once.
pub struct HttpTransport {
    client: reqwest::Client,
    webhook_url: String,
}

impl HttpTransport {
    pub fn new(webhook_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
        })
    }
}

#[async_trait]
impl NotificationTransport for HttpTransport {
    async fn deliver(&self, message: &OutboxMessage) -> Result<()> {
        post_json(&self.client, &self.webhook_url, message).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl NotificationTransport for LoggingTransport {
    async fn deliver(&self, message: &OutboxMessage) -> Result<()> {
        tracing::info!(
            id = %message.id,
            kind = %message.message_type,
            to = %message.recipient_user_id,
            org = %message.organization_id,
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use govern_core::outbox::{OutboxStatus, OutboxType};
    use serde_json::json;
    use uuid::Uuid;

    fn message() -> OutboxMessage {
        let now = Utc::now();
        OutboxMessage {
            id: Uuid::new_v4(),
            message_type: OutboxType::Escalation,
            recipient_user_id: "u-admin".into(),
            organization_id: "org-1".into(),
            payload: json!({"proposal_id": "p-1"}),
            status: OutboxStatus::Queued,
            attempts: 1,
            last_error: None,
            created_at: now,
            updated_at: now,
            next_attempt_at: now,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn webhook_receives_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::PartialJson(
                json!({"type": "ESCALATION", "recipient_user_id": "u-admin"}),
            ))
            .with_status(200)
            .create_async()
            .await;

        let t = HttpTransport::new(&format!("{}/hook", server.url()), Duration::from_secs(5)).unwrap();
        t.deliver(&message()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_failure_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/hook").with_status(500).create_async().await;

        let t = HttpTransport::new(&format!("{}/hook", server.url()), Duration::from_secs(5)).unwrap();
        assert!(t.deliver(&message()).await.is_err());
    }
}
