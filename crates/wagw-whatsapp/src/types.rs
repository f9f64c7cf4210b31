//! Shared types for the WhatsApp gateway adapter.
//!
//! Models cover chat identifiers, outbound media, send results, inbound
//! messages, polls, login QR codes, and session events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
//  Chat identifiers
// ═══════════════════════════════════════════════════════════════════════

/// Suffix of group chat identifiers.
pub const GROUP_SUFFIX: &str = "@g.us";
/// Suffix used by WhatsApp Web clients for individual chats.
pub const CONTACT_SUFFIX: &str = "@c.us";
/// Suffix used by the multi-device protocol for individual chats.
pub const USER_SUFFIX: &str = "@s.whatsapp.net";

/// Whether a chat identifier addresses a group.
pub fn is_group(chat_id: &str) -> bool {
    chat_id.ends_with(GROUP_SUFFIX)
}

/// Convert a chat identifier into the `number` field the gateway expects.
///
/// Groups keep their full JID. Individual chats are reduced to the bare
/// phone number (`12345@c.us` → `12345`), with `+`, spaces and dashes
/// stripped.
pub fn normalize_number(chat_id: &str) -> String {
    let trimmed = chat_id.trim();
    if is_group(trimmed) {
        return trimmed.to_string();
    }
    let bare = trimmed
        .strip_suffix(CONTACT_SUFFIX)
        .or_else(|| trimmed.strip_suffix(USER_SUFFIX))
        .unwrap_or(trimmed);
    bare.chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-'))
        .collect()
}

/// Convert a gateway JID into the `@c.us` form clients of the REST API use.
pub fn to_client_id(jid: &str) -> String {
    match jid.strip_suffix(USER_SUFFIX) {
        Some(user) => format!("{}{}", user, CONTACT_SUFFIX),
        None => jid.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Outbound
// ═══════════════════════════════════════════════════════════════════════

/// A media payload: base64 data plus its mimetype and optional filename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageMedia {
    pub mimetype: String,
    /// Base64-encoded file content.
    pub data: String,
    pub filename: Option<String>,
    /// Size in bytes, when known.
    pub filesize: Option<u64>,
}

/// Coarse media class the gateway uses to pick a message type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn from_mimetype(mimetype: &str) -> Self {
        let lower = mimetype.to_ascii_lowercase();
        match lower.split('/').next().unwrap_or("") {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }
}

/// Options accompanying an outbound media message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    pub caption: Option<String>,
}

impl SendOptions {
    /// Build options from an optional caption; empty captions are dropped.
    pub fn with_caption(caption: Option<String>) -> Self {
        Self {
            caption: caption.filter(|c| !c.is_empty()),
        }
    }
}

/// A single-choice or multi-choice poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub question: String,
    pub options: Vec<String>,
    pub allow_multiple_answers: bool,
}

impl Poll {
    /// Number of options a voter may select.
    pub fn selectable_count(&self) -> usize {
        if self.allow_multiple_answers {
            self.options.len()
        } else {
            1
        }
    }
}

/// Key identifying a message on the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// Result of a successful send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub key: MessageKey,
    pub timestamp: Option<i64>,
}

impl SentMessage {
    /// Serialized message id in `{fromMe}_{chat}_{id}` form.
    pub fn serialized(&self) -> String {
        format!(
            "{}_{}_{}",
            self.key.from_me,
            to_client_id(&self.key.remote_jid),
            self.key.id
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Inbound
// ═══════════════════════════════════════════════════════════════════════

/// A message observed on the session (received, or sent from the phone).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub key: MessageKey,
    /// Chat the message belongs to, in client (`@c.us` / `@g.us`) form.
    pub from: String,
    /// Recipient chat for self-originated messages.
    pub to: Option<String>,
    pub body: String,
    /// Gateway message type, e.g. `conversation`, `imageMessage`.
    pub message_type: String,
    pub has_media: bool,
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn from_me(&self) -> bool {
        self.key.from_me
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Session
// ═══════════════════════════════════════════════════════════════════════

/// Login QR code as issued by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginQr {
    /// Raw QR payload (what the phone scans). Some gateways only send the
    /// rendered image.
    pub code: Option<String>,
    /// Pre-rendered image as a data URL, when the gateway supplies one.
    pub image: Option<String>,
}

impl LoginQr {
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            image: None,
        }
    }

    /// `None` when the gateway sent neither a code nor a data-URL image.
    pub fn from_parts(code: Option<&str>, image: Option<&str>) -> Option<Self> {
        let code = code.filter(|s| !s.is_empty()).map(String::from);
        let image = image.filter(|s| s.starts_with("data:")).map(String::from);
        if code.is_none() && image.is_none() {
            return None;
        }
        Some(Self { code, image })
    }

    /// The raw code, or the image when no code was sent.
    pub fn payload(&self) -> &str {
        self.code
            .as_deref()
            .or(self.image.as_deref())
            .unwrap_or_default()
    }
}

/// Connection state of the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Open,
    Connecting,
    Close,
    Unknown,
}

impl ConnectionState {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "open" | "connected" => ConnectionState::Open,
            "connecting" => ConnectionState::Connecting,
            "close" | "closed" | "disconnected" => ConnectionState::Close,
            _ => ConnectionState::Unknown,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// Events emitted by the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientEvent {
    Qr(LoginQr),
    Ready,
    Disconnected(String),
    Message(InboundMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("5511999999999@c.us"), "5511999999999");
        assert_eq!(normalize_number("5511999999999@s.whatsapp.net"), "5511999999999");
        assert_eq!(normalize_number("+55 11-99999-9999"), "5511999999999");
        assert_eq!(
            normalize_number("120363401688020574@g.us"),
            "120363401688020574@g.us"
        );
    }

    #[test]
    fn test_to_client_id() {
        assert_eq!(to_client_id("123@s.whatsapp.net"), "123@c.us");
        assert_eq!(to_client_id("120363401688020574@g.us"), "120363401688020574@g.us");
    }

    #[test]
    fn test_serialized_id() {
        let sent = SentMessage {
            key: MessageKey {
                remote_jid: "123@s.whatsapp.net".into(),
                from_me: true,
                id: "3EB0ABC".into(),
                participant: None,
            },
            timestamp: None,
        };
        assert_eq!(sent.serialized(), "true_123@c.us_3EB0ABC");
    }

    #[test]
    fn test_media_kind_from_mimetype() {
        assert_eq!(MediaKind::from_mimetype("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mimetype("VIDEO/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mimetype("audio/ogg; codecs=opus"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mimetype("application/pdf"), MediaKind::Document);
    }

    #[test]
    fn test_poll_selectable_count() {
        let mut poll = Poll {
            question: "Q".into(),
            options: vec!["a".into(), "b".into(), "c".into()],
            allow_multiple_answers: false,
        };
        assert_eq!(poll.selectable_count(), 1);
        poll.allow_multiple_answers = true;
        assert_eq!(poll.selectable_count(), 3);
    }

    #[test]
    fn test_connection_state_parse() {
        assert!(ConnectionState::parse("open").is_open());
        assert_eq!(ConnectionState::parse("close"), ConnectionState::Close);
        assert_eq!(ConnectionState::parse("weird"), ConnectionState::Unknown);
    }

    #[test]
    fn test_send_options_drop_empty_caption() {
        assert_eq!(SendOptions::with_caption(Some(String::new())).caption, None);
        assert_eq!(
            SendOptions::with_caption(Some("hi".into())).caption.as_deref(),
            Some("hi")
        );
    }
}
