use axum::{
    async_trait,
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use wagw_whatsapp::{
    events, ClientEvent, MessageMedia, MessagingAdapter, SendOptions, SentMessage, SessionState,
    WhatsAppError,
};

use crate::config::AppConfig;
use crate::qr;
use crate::uploads::{StoredUpload, UploadStore};

// ═══════════════════════════════════════════════════════════════════════
//  Service
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ApiService {
    pub session: Arc<SessionState>,
    pub adapter: Arc<dyn MessagingAdapter>,
    /// Sink for events pushed by the gateway webhook.
    pub events: mpsc::Sender<ClientEvent>,
    pub uploads: UploadStore,
    /// Shared client for media downloads.
    pub http: reqwest::Client,
    pub send_ack_delay: Duration,
    pub public_dir: PathBuf,
    pub body_limit: usize,
}

impl ApiService {
    pub fn new(
        session: Arc<SessionState>,
        adapter: Arc<dyn MessagingAdapter>,
        events: mpsc::Sender<ClientEvent>,
        http: reqwest::Client,
        config: &AppConfig,
    ) -> Self {
        Self {
            session,
            adapter,
            events,
            uploads: UploadStore::new(config.server.upload_dir.clone()),
            http,
            send_ack_delay: Duration::from_millis(config.messaging.send_ack_delay_ms),
            public_dir: config.server.public_dir.clone(),
            body_limit: config.server.body_limit_bytes(),
        }
    }

    pub async fn start_server<F>(
        self: Arc<Self>,
        addr: SocketAddr,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.create_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("WhatsApp API server running on http://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }

    pub fn create_router(self: Arc<Self>) -> Router {
        let index = self.public_dir.join("index.html");
        let body_limit = self.body_limit;
        let public = ServeDir::new(&self.public_dir);

        Router::new()
            .route("/api/status", get(status))
            // Sending
            .route("/api/send-message", post(send_message))
            .route("/api/send-media-from-file", post(send_media_from_file))
            .route("/api/send-media-from-url", post(send_media_from_url))
            .route("/api/send-media-from-data", post(send_media_from_data))
            // QR login
            .route("/api/qrcode", get(qrcode))
            .route("/api/qrcode/svg", get(qrcode_svg))
            .route_service("/qrcode", ServeFile::new(index))
            // Gateway session events
            .route("/webhook/gateway", post(gateway_webhook))
            .fallback_service(public)
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    fn ensure_ready(&self) -> Result<(), ApiError> {
        if self.session.is_ready() {
            Ok(())
        } else {
            Err(ApiError::NotReady)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("WhatsApp client not ready")]
    NotReady,
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}: {source}")]
    SendFailed {
        message: &'static str,
        source: WhatsAppError,
    },
    #[error("QR code not available. Client might be already authenticated.")]
    QrUnavailable,
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn missing(message: &str) -> Self {
        ApiError::BadRequest(message.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::NotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "success": false, "message": self.to_string() }),
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "success": false, "message": message }),
            ),
            ApiError::SendFailed { message, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "success": false,
                    "message": message,
                    "error": source.message,
                }),
            ),
            ApiError::QrUnavailable => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "success": false, "message": self.to_string() }),
            ),
            ApiError::Rejected { status, message } => (
                *status,
                serde_json::json!({ "success": false, "message": message }),
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "success": false, "message": message }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn send_failed(message: &'static str) -> impl FnOnce(WhatsAppError) -> ApiError {
    move |source| {
        error!("{}: {}", message, source);
        ApiError::SendFailed { message, source }
    }
}

fn sent_response(message: &str, sent: &SentMessage) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "message": message,
        "messageId": sent.serialized(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════
//  Body extraction
// ═══════════════════════════════════════════════════════════════════════

/// Accepts a JSON or form-encoded body. An empty body deserializes as `{}`.
pub struct FormOrJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for FormOrJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.to_ascii_lowercase()
                    .starts_with("application/x-www-form-urlencoded")
            })
            .unwrap_or(false);

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Rejected {
                status: rejection.status(),
                message: rejection.body_text(),
            })?;

        let value = if bytes.iter().all(u8::is_ascii_whitespace) {
            serde_json::Value::Object(Default::default())
        } else if is_form {
            let map = url::form_urlencoded::parse(&bytes)
                .map(|(k, v)| (k.into_owned(), serde_json::Value::String(v.into_owned())))
                .collect::<serde_json::Map<_, _>>();
            serde_json::Value::Object(map)
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
        };

        serde_json::from_value(value)
            .map(FormOrJson)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
    }
}

/// Keeps string values only; any other JSON type reads as absent.
fn text_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

/// Missing and empty fields are treated alike.
fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

// ═══════════════════════════════════════════════════════════════════════
//  Handlers
// ═══════════════════════════════════════════════════════════════════════

async fn status(State(api): State<Arc<ApiService>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "online",
        "clientReady": api.session.is_ready(),
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default, deserialize_with = "text_field")]
    pub chat_id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub message: Option<String>,
}

async fn send_message(
    State(api): State<Arc<ApiService>>,
    FormOrJson(req): FormOrJson<SendMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    api.ensure_ready()?;

    let (chat_id, message) = match (present(&req.chat_id), present(&req.message)) {
        (Some(c), Some(m)) => (c, m),
        _ => return Err(ApiError::missing("chatId and message are required")),
    };

    let sent = api
        .adapter
        .send_text(chat_id, message)
        .await
        .map_err(send_failed("Failed to send message"))?;

    tokio::time::sleep(api.send_ack_delay).await;
    info!(message_id = %sent.serialized(), "Message sent");

    Ok(sent_response("Message sent successfully", &sent))
}

async fn send_media_from_file(
    State(api): State<Arc<ApiService>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    api.ensure_ready()?;

    let mut chat_id: Option<String> = None;
    let mut caption: Option<String> = None;
    let mut upload: Option<StoredUpload> = None;

    if let Ok(mut multipart) = multipart {
        let read = read_upload_form(
            &api.uploads,
            &mut multipart,
            &mut chat_id,
            &mut caption,
            &mut upload,
        )
        .await;
        if let Err(e) = read {
            if let Some(stored) = upload {
                stored.remove().await;
            }
            return Err(e);
        }
    }

    let Some(chat_id) = chat_id.filter(|c| !c.is_empty()) else {
        if let Some(stored) = upload {
            stored.remove().await;
        }
        return Err(ApiError::missing("chatId is required"));
    };
    let Some(stored) = upload else {
        return Err(ApiError::missing("No file uploaded"));
    };

    let result = send_stored_upload(&api, &chat_id, &stored, caption).await;
    stored.remove().await;

    let sent = result.map_err(send_failed("Failed to send media"))?;
    Ok(sent_response("Media sent successfully", &sent))
}

async fn read_upload_form(
    uploads: &UploadStore,
    multipart: &mut Multipart,
    chat_id: &mut Option<String>,
    caption: &mut Option<String>,
    upload: &mut Option<StoredUpload>,
) -> Result<(), ApiError> {
    let rejected = |e: axum::extract::multipart::MultipartError| ApiError::Rejected {
        status: e.status(),
        message: e.body_text(),
    };

    while let Some(field) = multipart.next_field().await.map_err(rejected)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "chatId" => *chat_id = Some(field.text().await.map_err(rejected)?),
            "caption" => *caption = Some(field.text().await.map_err(rejected)?),
            "file" => {
                let original = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(rejected)?;
                if let Some(previous) = upload.take() {
                    previous.remove().await;
                }
                let stored = uploads.save(&original, &bytes).await.map_err(|e| {
                    error!("Failed to store upload: {}", e);
                    ApiError::Internal(format!("Failed to store upload: {}", e))
                })?;
                *upload = Some(stored);
            }
            other => warn!(field = other, "Ignoring unknown multipart field"),
        }
    }
    Ok(())
}

async fn send_stored_upload(
    api: &ApiService,
    chat_id: &str,
    stored: &StoredUpload,
    caption: Option<String>,
) -> Result<SentMessage, WhatsAppError> {
    let mut media = MessageMedia::from_file_path(&stored.path).await?;
    media.filename = Some(stored.original_name.clone());
    api.adapter
        .send_media(chat_id, &media, &SendOptions::with_caption(caption))
        .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaFromUrlRequest {
    #[serde(default, deserialize_with = "text_field")]
    pub chat_id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub caption: Option<String>,
}

async fn send_media_from_url(
    State(api): State<Arc<ApiService>>,
    FormOrJson(req): FormOrJson<SendMediaFromUrlRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    api.ensure_ready()?;

    let (chat_id, url) = match (present(&req.chat_id), present(&req.url)) {
        (Some(c), Some(u)) => (c, u),
        _ => return Err(ApiError::missing("chatId and url are required")),
    };

    let sent = send_remote_media(&api, chat_id, url, req.caption.clone())
        .await
        .map_err(send_failed("Failed to send media from URL"))?;
    Ok(sent_response("Media from URL sent successfully", &sent))
}

async fn send_remote_media(
    api: &ApiService,
    chat_id: &str,
    url: &str,
    caption: Option<String>,
) -> Result<SentMessage, WhatsAppError> {
    let media = MessageMedia::from_url(&api.http, url).await?;
    api.adapter
        .send_media(chat_id, &media, &SendOptions::with_caption(caption))
        .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaFromDataRequest {
    #[serde(default, deserialize_with = "text_field")]
    pub chat_id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub mimetype: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub data: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub caption: Option<String>,
}

async fn send_media_from_data(
    State(api): State<Arc<ApiService>>,
    FormOrJson(req): FormOrJson<SendMediaFromDataRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    api.ensure_ready()?;

    let (chat_id, mimetype, data) =
        match (present(&req.chat_id), present(&req.mimetype), present(&req.data)) {
            (Some(c), Some(m), Some(d)) => (c, m, d),
            _ => return Err(ApiError::missing("chatId, mimetype, and data are required")),
        };

    let media = MessageMedia::new(mimetype, data, req.filename.clone());
    let sent = api
        .adapter
        .send_media(chat_id, &media, &SendOptions::with_caption(req.caption.clone()))
        .await
        .map_err(send_failed("Failed to send media from data"))?;

    Ok(sent_response("Media from data sent successfully", &sent))
}

async fn qrcode(State(api): State<Arc<ApiService>>) -> Result<Json<serde_json::Value>, ApiError> {
    let qr = api.session.latest_qr().await.ok_or(ApiError::QrUnavailable)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "qrCode": qr.payload(),
    })))
}

async fn qrcode_svg(State(api): State<Arc<ApiService>>) -> Result<Response, ApiError> {
    let qr = api.session.latest_qr().await.ok_or(ApiError::QrUnavailable)?;

    // Image-only QRs are served as the gateway rendered them.
    let Some(code) = qr.code.as_deref() else {
        let (mime, bytes) = qr
            .image
            .as_deref()
            .and_then(qr::decode_data_url)
            .ok_or_else(|| ApiError::Internal("QR image is not a valid data URL".into()))?;
        return Ok((
            [
                (header::CONTENT_TYPE, mime),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
            bytes,
        )
            .into_response());
    };

    let svg = qr::render_svg(code, None)
        .map_err(|e| ApiError::Internal(format!("Failed to render QR code: {}", e)))?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        svg,
    )
        .into_response())
}

async fn gateway_webhook(
    State(api): State<Arc<ApiService>>,
    body: Bytes,
) -> Response {
    let parsed = match events::parse_payload(&body) {
        Ok(events) => events,
        Err(e) => {
            warn!("Rejected gateway webhook: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "received": false, "error": e.message })),
            )
                .into_response();
        }
    };

    for event in parsed {
        if api.events.send(event).await.is_err() {
            error!("Event dispatcher is gone, dropping gateway event");
            break;
        }
    }

    Json(serde_json::json!({ "received": true })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    async fn extract(
        content_type: Option<&str>,
        body: &str,
    ) -> Result<SendMessageRequest, ApiError> {
        let mut builder = HttpRequest::builder().method("POST").uri("/");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let req = builder.body(axum::body::Body::from(body.to_string())).unwrap();
        FormOrJson::<SendMessageRequest>::from_request(req, &())
            .await
            .map(|FormOrJson(r)| r)
    }

    #[tokio::test]
    async fn test_json_body() {
        let req = extract(Some("application/json"), r#"{"chatId":"1@c.us","message":"hi"}"#)
            .await
            .unwrap();
        assert_eq!(req.chat_id.as_deref(), Some("1@c.us"));
        assert_eq!(req.message.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_form_body() {
        let req = extract(
            Some("application/x-www-form-urlencoded; charset=utf-8"),
            "chatId=1%40c.us&message=hello+there",
        )
        .await
        .unwrap();
        assert_eq!(req.chat_id.as_deref(), Some("1@c.us"));
        assert_eq!(req.message.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_object() {
        let req = extract(None, "").await.unwrap();
        assert!(req.chat_id.is_none());
        assert!(req.message.is_none());
    }

    #[tokio::test]
    async fn test_non_string_fields_read_as_absent() {
        let req = extract(
            Some("application/json"),
            r#"{"chatId":5511999999999,"message":["hi"]}"#,
        )
        .await
        .unwrap();
        assert!(req.chat_id.is_none());
        assert!(req.message.is_none());
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let err = extract(Some("application/json"), "{not json").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_present() {
        assert_eq!(present(&Some("x".into())), Some("x"));
        assert_eq!(present(&Some(String::new())), None);
        assert_eq!(present(&None), None);
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::NotReady.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::missing("x").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::QrUnavailable.into_response().status(),
            StatusCode::NOT_FOUND
        );
        let failed = ApiError::SendFailed {
            message: "Failed to send message",
            source: WhatsAppError::network("boom"),
        };
        assert_eq!(
            failed.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
