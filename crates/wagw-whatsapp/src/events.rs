//! Inbound webhook handling for session gateway events.
//!
//! The gateway POSTs `{ "event", "instance", "data", "sender"? }` envelopes.
//! Three events matter here:
//! - `qrcode.updated`    → a fresh login QR
//! - `connection.update` → session opened / closed
//! - `messages.upsert`   → new message (one object or an array)
//!
//! Everything else is ignored.

use crate::error::{WhatsAppError, WhatsAppResult};
use crate::types::*;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};

/// Message payload keys that carry downloadable media.
const MEDIA_MESSAGE_KEYS: &[&str] = &[
    "imageMessage",
    "videoMessage",
    "audioMessage",
    "documentMessage",
    "documentWithCaptionMessage",
    "stickerMessage",
];

const STATUS_BROADCAST: &str = "status@broadcast";

/// `QRCODE_UPDATED` and `qrcode.updated` both become `qrcode.updated`.
pub fn normalize_event_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', ".")
}

/// Parse a raw webhook body into session events.
pub fn parse_payload(raw_body: &[u8]) -> WhatsAppResult<Vec<ClientEvent>> {
    let payload: serde_json::Value = serde_json::from_slice(raw_body)
        .map_err(|e| WhatsAppError::serialization(format!("Webhook JSON parse: {}", e)))?;
    Ok(parse_value(&payload))
}

/// Parse an already-decoded webhook envelope.
pub fn parse_value(payload: &serde_json::Value) -> Vec<ClientEvent> {
    let event = normalize_event_name(payload["event"].as_str().unwrap_or(""));
    let data = &payload["data"];

    match event.as_str() {
        "qrcode.updated" => parse_qr(data).map(ClientEvent::Qr).into_iter().collect(),
        "connection.update" => parse_connection(data).into_iter().collect(),
        "messages.upsert" => {
            let owner = payload["sender"].as_str().map(to_client_id);
            let items = match data.as_array() {
                Some(arr) => arr.iter().collect::<Vec<_>>(),
                None => vec![data],
            };
            items
                .into_iter()
                .filter_map(|m| parse_message(m, owner.as_deref()))
                .map(ClientEvent::Message)
                .collect()
        }
        other => {
            debug!("Ignoring gateway event '{}'", other);
            Vec::new()
        }
    }
}

fn parse_qr(data: &serde_json::Value) -> Option<LoginQr> {
    let qr = &data["qrcode"];
    let image = qr["base64"].as_str().or_else(|| qr.as_str());
    let parsed = LoginQr::from_parts(qr["code"].as_str(), image);
    if parsed.is_none() {
        warn!("qrcode.updated without a QR payload");
    }
    parsed
}

fn parse_connection(data: &serde_json::Value) -> Option<ClientEvent> {
    match ConnectionState::parse(data["state"].as_str().unwrap_or("")) {
        ConnectionState::Open => Some(ClientEvent::Ready),
        ConnectionState::Close => {
            let reason = data["statusReason"]
                .as_u64()
                .map(|c| format!("status {}", c))
                .or_else(|| data["reason"].as_str().map(String::from))
                .unwrap_or_else(|| "connection closed".to_string());
            Some(ClientEvent::Disconnected(reason))
        }
        _ => None,
    }
}

fn parse_message(msg: &serde_json::Value, owner: Option<&str>) -> Option<InboundMessage> {
    let key: MessageKey = serde_json::from_value(msg["key"].clone()).ok()?;
    if key.remote_jid == STATUS_BROADCAST {
        return None;
    }

    let content = &msg["message"];
    let chat = to_client_id(&key.remote_jid);
    let (from, to) = if key.from_me {
        (owner.map(String::from).unwrap_or_else(|| chat.clone()), Some(chat))
    } else {
        (chat, owner.map(String::from))
    };

    let body = content["conversation"]
        .as_str()
        .or_else(|| content["extendedTextMessage"]["text"].as_str())
        .or_else(|| {
            MEDIA_MESSAGE_KEYS
                .iter()
                .find_map(|k| content[*k]["caption"].as_str())
        })
        .or_else(|| content["documentWithCaptionMessage"]["message"]["documentMessage"]["caption"].as_str())
        .unwrap_or("")
        .to_string();

    let message_type = msg["messageType"]
        .as_str()
        .map(String::from)
        .or_else(|| {
            content.as_object().and_then(|o| {
                o.keys()
                    .find(|k| k.as_str() != "messageContextInfo")
                    .cloned()
            })
        })
        .unwrap_or_else(|| "unknown".to_string());

    let has_media = MEDIA_MESSAGE_KEYS
        .iter()
        .any(|k| !content[*k].is_null());

    let timestamp = msg["messageTimestamp"]
        .as_i64()
        .or_else(|| msg["messageTimestamp"].as_str().and_then(|s| s.parse().ok()))
        .and_then(epoch_to_datetime)
        .unwrap_or_else(Utc::now);

    Some(InboundMessage {
        key,
        from,
        to,
        body,
        message_type,
        has_media,
        push_name: msg["pushName"].as_str().map(String::from),
        timestamp,
    })
}

fn epoch_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
