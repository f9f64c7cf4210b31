//! Forwards messages from the watched chat to an external webhook.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info};
use url::Url;
use wagw_whatsapp::InboundMessage;

use crate::config::RelayConfig;

#[derive(Debug, Clone)]
pub struct WebhookRelay {
    enabled: bool,
    chat_id: String,
    target_url: String,
    message_type: String,
    http: reqwest::Client,
}

impl WebhookRelay {
    pub fn new(config: &RelayConfig, http: reqwest::Client) -> Self {
        Self {
            enabled: config.enabled,
            chat_id: config.chat_id.clone(),
            target_url: config.target_url.clone(),
            message_type: config.message_type.clone(),
            http,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Only messages in the watched chat that the session did not send itself.
    pub fn should_relay(&self, message: &InboundMessage) -> bool {
        self.enabled && message.from == self.chat_id && !message.from_me()
    }

    /// Target URL with the message encoded as query parameters.
    pub fn build_url(
        &self,
        message: &InboundMessage,
        timestamp: DateTime<Utc>,
    ) -> Result<Url, url::ParseError> {
        let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        Url::parse_with_params(
            &self.target_url,
            &[
                ("message", message.body.as_str()),
                ("from", message.from.as_str()),
                ("chatId", self.chat_id.as_str()),
                ("timestamp", timestamp.as_str()),
                ("messageType", self.message_type.as_str()),
            ],
        )
    }

    /// Fire one GET at the webhook. Failures are logged and swallowed.
    pub async fn forward(&self, message: &InboundMessage) {
        let url = match self.build_url(message, Utc::now()) {
            Ok(u) => u,
            Err(e) => {
                error!(target_url = %self.target_url, "Invalid relay URL: {}", e);
                return;
            }
        };
        info!(%url, "Relaying message to webhook");

        match self.http.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                info!(status = status.as_u16(), body = %body, "Webhook response");
            }
            Err(e) => {
                error!("Error sending to webhook: {}", e);
            }
        }
    }
}
