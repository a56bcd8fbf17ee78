// Chat Service - outbound Slack/Teams/WhatsApp messages

use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat endpoint returned {0}")]
    Status(u16),
}

/// Posts workflow notifications to chat webhook URLs. Slack and Teams
/// use incoming-webhook payloads; WhatsApp goes through a bridge that
/// accepts a number + text body.
#[derive(Clone, Default)]
pub struct ChatNotifier {
    client: reqwest::Client,
}

impl ChatNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn send_slack(&self, webhook_url: &str, message: &str) -> Result<(), ChatError> {
        self.post(webhook_url, &serde_json::json!({ "text": message }), "Slack")
            .await
    }

    pub async fn send_teams(&self, webhook_url: &str, message: &str) -> Result<(), ChatError> {
        self.post(webhook_url, &serde_json::json!({ "text": message }), "Teams")
            .await
    }

    pub async fn send_whatsapp(
        &self,
        bridge_url: &str,
        number: &str,
        message: &str,
    ) -> Result<(), ChatError> {
        self.post(
            bridge_url,
            &serde_json::json!({ "to": number, "body": message }),
            "WhatsApp",
        )
        .await
    }

    async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
        channel: &str,
    ) -> Result<(), ChatError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();

        if status.is_success() {
            info!("{} notification sent", channel);
            Ok(())
        } else {
            error!("{} notification failed with {}", channel, status);
            Err(ChatError::Status(status.as_u16()))
        }
    }
}
