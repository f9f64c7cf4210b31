//! # wagw-whatsapp — WhatsApp session gateway adapter
//!
//! Drives one WhatsApp Web multi-device session hosted by an external
//! session gateway (Evolution API compatible REST surface).
//!
//! ## Capabilities
//!
//! - **Messaging** – text, media (image, video, audio, document), polls,
//!   and quoted replies.
//! - **Media** – build payloads from local files, remote URLs, or base64;
//!   download media attached to inbound messages.
//! - **Session** – QR login, connection-state polling, readiness tracking.
//! - **Webhooks** – parse gateway `qrcode.updated`, `connection.update`, and
//!   `messages.upsert` events into [`ClientEvent`]s.

pub mod adapter;
pub mod api_client;
pub mod error;
pub mod events;
pub mod media;
pub mod session;
pub mod types;

// Re-exports
#[cfg(feature = "test-util")]
pub use adapter::MockMessagingAdapter;
pub use adapter::{GatewayAdapter, MessagingAdapter};
pub use api_client::{GatewayClient, GatewayConfig};
pub use error::{WhatsAppError, WhatsAppErrorCode, WhatsAppResult};
pub use session::{SessionState, SessionWatcher};
pub use types::*;
