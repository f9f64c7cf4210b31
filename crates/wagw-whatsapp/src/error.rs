//! Crate-level error types for the WhatsApp gateway adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alias for `Result<T, WhatsAppError>`.
pub type WhatsAppResult<T> = Result<T, WhatsAppError>;

/// Uniform error type used across the adapter crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppError {
    pub code: WhatsAppErrorCode,
    pub message: String,
    /// Optional raw detail from the gateway response.
    pub details: Option<String>,
    /// HTTP status code if originated from a gateway call.
    pub http_status: Option<u16>,
}

impl fmt::Display for WhatsAppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Handlers surface this text verbatim as the `error` field.
        f.write_str(&self.message)
    }
}

impl std::error::Error for WhatsAppError {}

/// Categorised error codes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WhatsAppErrorCode {
    // ── Session ──────────────────────────────────────────
    NotConfigured,
    NotReady,
    // ── Gateway ──────────────────────────────────────────
    Unauthorized,
    InvalidParameter,
    ResourceNotFound,
    RateLimited,
    UpstreamError,
    // ── Media ────────────────────────────────────────────
    MediaError,
    // ── Internal ─────────────────────────────────────────
    NetworkError,
    SerializationError,
    InternalError,
}

impl WhatsAppError {
    fn with_code(code: WhatsAppErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            details: None,
            http_status: None,
        }
    }

    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::NotConfigured, msg)
    }

    pub fn not_ready() -> Self {
        Self::with_code(WhatsAppErrorCode::NotReady, "WhatsApp client not ready")
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::InvalidParameter, msg)
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::MediaError, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::NetworkError, msg)
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::SerializationError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::InternalError, msg)
    }

    /// Build from a gateway JSON error body.
    pub fn from_api_response(status: u16, body: &str) -> Self {
        let msg = Self::parse_gateway_error(body);
        let code = Self::classify(status, &msg);
        Self {
            code,
            message: msg,
            details: Some(body.chars().take(500).collect()),
            http_status: Some(status),
        }
    }

    /// Gateways report errors as one of:
    /// `{ "message": "..." }`,
    /// `{ "error": "...", "response": { "message": ["..."] } }`, or
    /// `{ "error": { "message": "..." } }`.
    fn parse_gateway_error(body: &str) -> String {
        let v: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => {
                let trimmed = body.trim();
                return if trimmed.is_empty() {
                    "Empty error response from gateway".to_string()
                } else {
                    trimmed.chars().take(200).collect()
                };
            }
        };

        let response_msg = match &v["response"]["message"] {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|i| match i {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            _ => None,
        };

        response_msg
            .or_else(|| v["message"].as_str().map(String::from))
            .or_else(|| v["error"]["message"].as_str().map(String::from))
            .or_else(|| v["error"].as_str().map(String::from))
            .unwrap_or_else(|| "Unknown gateway error".to_string())
    }

    fn classify(status: u16, msg: &str) -> WhatsAppErrorCode {
        let lower = msg.to_lowercase();
        match status {
            400 => WhatsAppErrorCode::InvalidParameter,
            401 | 403 => WhatsAppErrorCode::Unauthorized,
            404 => WhatsAppErrorCode::ResourceNotFound,
            429 => WhatsAppErrorCode::RateLimited,
            _ => {
                if lower.contains("rate") {
                    WhatsAppErrorCode::RateLimited
                } else if lower.contains("not connected") || lower.contains("connection closed") {
                    WhatsAppErrorCode::NotReady
                } else {
                    WhatsAppErrorCode::UpstreamError
                }
            }
        }
    }
}
