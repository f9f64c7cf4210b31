//! The messaging adapter seam and its gateway-backed implementation.
//!
//! Handlers and the inbound dispatcher only ever see `dyn MessagingAdapter`;
//! `GatewayAdapter` maps each operation onto one REST call against the
//! session gateway.

use crate::api_client::{GatewayClient, GatewayConfig};
use crate::error::{WhatsAppError, WhatsAppResult};
use crate::types::*;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::json;

/// Operations the HTTP façade needs from a WhatsApp session.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait MessagingAdapter: Send + Sync {
    /// Ask the session to connect. Returns a login QR while unpaired.
    async fn connect(&self) -> WhatsAppResult<Option<LoginQr>>;

    async fn connection_state(&self) -> WhatsAppResult<ConnectionState>;

    async fn send_text(&self, chat_id: &str, text: &str) -> WhatsAppResult<SentMessage>;

    async fn send_media(
        &self,
        chat_id: &str,
        media: &MessageMedia,
        options: &SendOptions,
    ) -> WhatsAppResult<SentMessage>;

    async fn send_poll(&self, chat_id: &str, poll: &Poll) -> WhatsAppResult<SentMessage>;

    /// Quote `message` in its own chat.
    async fn reply(&self, message: &InboundMessage, text: &str) -> WhatsAppResult<SentMessage>;

    /// Fetch the media attached to `message`, if the gateway still has it.
    async fn download_media(&self, message: &InboundMessage)
        -> WhatsAppResult<Option<MessageMedia>>;
}

/// `MessagingAdapter` backed by the session gateway's REST API.
#[derive(Debug, Clone)]
pub struct GatewayAdapter {
    client: GatewayClient,
}

impl GatewayAdapter {
    pub fn new(config: &GatewayConfig) -> WhatsAppResult<Self> {
        Ok(Self {
            client: GatewayClient::new(config)?,
        })
    }

    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    fn build_text_payload(chat_id: &str, text: &str) -> serde_json::Value {
        json!({
            "number": normalize_number(chat_id),
            "text": text,
        })
    }

    fn build_media_payload(
        chat_id: &str,
        media: &MessageMedia,
        options: &SendOptions,
    ) -> serde_json::Value {
        let kind = MediaKind::from_mimetype(&media.mimetype);
        let file_name = media
            .filename
            .clone()
            .unwrap_or_else(|| format!("file.{}", kind.as_str()));

        let mut payload = json!({
            "number": normalize_number(chat_id),
            "mediatype": kind.as_str(),
            "mimetype": media.mimetype,
            "media": media.raw_data(),
            "fileName": file_name,
        });
        if let Some(ref caption) = options.caption {
            payload["caption"] = json!(caption);
        }
        payload
    }

    fn build_poll_payload(chat_id: &str, poll: &Poll) -> serde_json::Value {
        json!({
            "number": normalize_number(chat_id),
            "name": poll.question,
            "selectableCount": poll.selectable_count(),
            "values": poll.options,
        })
    }

    fn build_reply_payload(message: &InboundMessage, text: &str) -> serde_json::Value {
        json!({
            "number": normalize_number(&message.key.remote_jid),
            "text": text,
            "quoted": {
                "key": {
                    "id": message.key.id,
                    "remoteJid": message.key.remote_jid,
                    "fromMe": message.key.from_me,
                },
                "message": { "conversation": message.body },
            },
        })
    }

    /// Extract the sent message key from a send response.
    fn parse_sent(resp: &serde_json::Value) -> WhatsAppResult<SentMessage> {
        let key: MessageKey = serde_json::from_value(resp["key"].clone()).map_err(|e| {
            WhatsAppError::serialization(format!("No message key in send response: {}", e))
        })?;

        // Timestamps arrive either as numbers or numeric strings.
        let timestamp = resp["messageTimestamp"]
            .as_i64()
            .or_else(|| resp["messageTimestamp"].as_str().and_then(|s| s.parse().ok()));

        Ok(SentMessage { key, timestamp })
    }

    fn parse_qr(resp: &serde_json::Value) -> Option<LoginQr> {
        let code = resp["code"]
            .as_str()
            .or_else(|| resp["qrcode"]["code"].as_str());
        let image = resp["base64"]
            .as_str()
            .or_else(|| resp["qrcode"]["base64"].as_str());
        LoginQr::from_parts(code, image)
    }

    fn parse_state(resp: &serde_json::Value) -> ConnectionState {
        let state = resp["instance"]["state"]
            .as_str()
            .or_else(|| resp["state"].as_str())
            .unwrap_or("");
        ConnectionState::parse(state)
    }
}

#[async_trait]
impl MessagingAdapter for GatewayAdapter {
    async fn connect(&self) -> WhatsAppResult<Option<LoginQr>> {
        let url = self.client.instance_url("instance", "connect");
        let resp = self.client.get(&url).await?;

        if Self::parse_state(&resp).is_open() {
            info!("Gateway instance already connected");
            return Ok(None);
        }
        Ok(Self::parse_qr(&resp))
    }

    async fn connection_state(&self) -> WhatsAppResult<ConnectionState> {
        let url = self.client.instance_url("instance", "connectionState");
        let resp = self.client.get(&url).await?;
        Ok(Self::parse_state(&resp))
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> WhatsAppResult<SentMessage> {
        let url = self.client.instance_url("message", "sendText");
        debug!("Sending text to {}", chat_id);
        let resp = self
            .client
            .post_json(&url, &Self::build_text_payload(chat_id, text))
            .await?;
        Self::parse_sent(&resp)
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: &MessageMedia,
        options: &SendOptions,
    ) -> WhatsAppResult<SentMessage> {
        media.validate()?;
        let url = self.client.instance_url("message", "sendMedia");
        debug!("Sending {} to {}", media.mimetype, chat_id);
        let resp = self
            .client
            .post_json(&url, &Self::build_media_payload(chat_id, media, options))
            .await?;
        Self::parse_sent(&resp)
    }

    async fn send_poll(&self, chat_id: &str, poll: &Poll) -> WhatsAppResult<SentMessage> {
        if poll.options.len() < 2 {
            return Err(WhatsAppError::invalid_parameter(
                "A poll needs at least two options",
            ));
        }
        let url = self.client.instance_url("message", "sendPoll");
        let resp = self
            .client
            .post_json(&url, &Self::build_poll_payload(chat_id, poll))
            .await?;
        Self::parse_sent(&resp)
    }

    async fn reply(&self, message: &InboundMessage, text: &str) -> WhatsAppResult<SentMessage> {
        let url = self.client.instance_url("message", "sendText");
        let resp = self
            .client
            .post_json(&url, &Self::build_reply_payload(message, text))
            .await?;
        Self::parse_sent(&resp)
    }

    async fn download_media(
        &self,
        message: &InboundMessage,
    ) -> WhatsAppResult<Option<MessageMedia>> {
        let url = self
            .client
            .instance_url("chat", "getBase64FromMediaMessage");
        let body = json!({
            "message": { "key": { "id": message.key.id } },
            "convertToMp4": false,
        });
        let resp = self.client.post_json(&url, &body).await?;

        let data = match resp["base64"].as_str().filter(|s| !s.is_empty()) {
            Some(d) => d.to_string(),
            None => return Ok(None),
        };
        let mimetype = resp["mimetype"]
            .as_str()
            .unwrap_or(crate::media::DEFAULT_MIMETYPE)
            .to_string();
        let filename = resp["fileName"].as_str().map(String::from);

        Ok(Some(MessageMedia::new(mimetype, data, filename)))
    }
}
