//! Building `MessageMedia` payloads from files, URLs, and raw base64.

use crate::error::{WhatsAppError, WhatsAppResult};
use crate::types::MessageMedia;
use base64::{engine::general_purpose, Engine as _};
use log::{debug, info};
use std::path::Path;

/// Fallback when nothing better is known.
pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

impl MessageMedia {
    /// Wrap already base64-encoded data.
    pub fn new(
        mimetype: impl Into<String>,
        data: impl Into<String>,
        filename: Option<String>,
    ) -> Self {
        Self {
            mimetype: mimetype.into(),
            data: data.into(),
            filename: filename.filter(|f| !f.is_empty()),
            filesize: None,
        }
    }

    /// Encode raw bytes.
    pub fn from_bytes(mimetype: impl Into<String>, bytes: &[u8], filename: Option<String>) -> Self {
        let mut media = Self::new(mimetype, general_purpose::STANDARD.encode(bytes), filename);
        media.filesize = Some(bytes.len() as u64);
        media
    }

    /// Read a local file; the mimetype is guessed from its extension.
    pub async fn from_file_path(path: impl AsRef<Path>) -> WhatsAppResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| WhatsAppError::media(format!("Read file error: {}", e)))?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from);
        let mimetype = guess_mimetype(filename.as_deref().unwrap_or(""));

        debug!("Loaded {} bytes from {}", bytes.len(), path.display());
        Ok(Self::from_bytes(mimetype, &bytes, filename))
    }

    /// Download a remote file. Any `Content-Type` the server reports is
    /// accepted as-is; the filename is taken from the last URL path segment.
    pub async fn from_url(http: &reqwest::Client, url: &str) -> WhatsAppResult<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| WhatsAppError::invalid_parameter(format!("Invalid URL: {}", e)))?;

        let resp = http
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| WhatsAppError::network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(WhatsAppError::media(format!(
                "Failed to download media from {}: HTTP {}",
                url,
                status.as_u16()
            )));
        }

        let filename = parsed
            .path_segments()
            .and_then(|mut segs| segs.next_back())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let header_mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty());

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| WhatsAppError::network(format!("Download failed: {}", e)))?;

        let mimetype =
            header_mime.unwrap_or_else(|| guess_mimetype(filename.as_deref().unwrap_or("")));

        info!("Downloaded {} bytes ({}) from {}", bytes.len(), mimetype, url);
        Ok(Self::from_bytes(mimetype, &bytes, filename))
    }

    /// Check the mimetype is present and the data decodes as base64.
    pub fn validate(&self) -> WhatsAppResult<()> {
        if self.mimetype.trim().is_empty() {
            return Err(WhatsAppError::invalid_parameter("mimetype is required"));
        }
        if self.data.is_empty() {
            return Err(WhatsAppError::invalid_parameter("media data is empty"));
        }
        general_purpose::STANDARD
            .decode(strip_data_url(&self.data))
            .map_err(|e| WhatsAppError::invalid_parameter(format!("Invalid base64 data: {}", e)))?;
        Ok(())
    }

    /// Base64 payload without any `data:<mime>;base64,` prefix.
    pub fn raw_data(&self) -> &str {
        strip_data_url(&self.data)
    }
}

fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some(idx) = data.find(";base64,") {
            return &data[idx + ";base64,".len()..];
        }
    }
    data
}

/// Guess a mimetype from a file name's extension.
pub fn guess_mimetype(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let mime = match ext.as_str() {
        // Images
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        // Video
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mov" => "video/quicktime",
        // Audio
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "amr" => "audio/amr",
        "ogg" | "oga" | "opus" => "audio/ogg",
        // Documents
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        _ => DEFAULT_MIMETYPE,
    };
    mime.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_guess_mimetype() {
        assert_eq!(guess_mimetype("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mimetype("clip.mp4"), "video/mp4");
        assert_eq!(guess_mimetype("report.pdf"), "application/pdf");
        assert_eq!(guess_mimetype("noext"), DEFAULT_MIMETYPE);
    }

    #[test]
    fn test_validate() {
        let ok = MessageMedia::new("image/png", "aGVsbG8=", None);
        assert!(ok.validate().is_ok());

        let data_url = MessageMedia::new("image/png", "data:image/png;base64,aGVsbG8=", None);
        assert!(data_url.validate().is_ok());
        assert_eq!(data_url.raw_data(), "aGVsbG8=");

        let bad = MessageMedia::new("image/png", "not base64!!", None);
        assert!(bad.validate().is_err());

        let no_mime = MessageMedia::new("", "aGVsbG8=", None);
        assert!(no_mime.validate().is_err());
    }

    #[test]
    fn test_empty_filename_dropped() {
        let media = MessageMedia::new("image/png", "aGVsbG8=", Some(String::new()));
        assert_eq!(media.filename, None);
    }

    #[tokio::test]
    async fn test_from_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"hello").unwrap();

        let media = MessageMedia::from_file_path(&path).await.unwrap();
        assert_eq!(media.mimetype, "text/plain");
        assert_eq!(media.data, "aGVsbG8=");
        assert_eq!(media.filename.as_deref(), Some("note.txt"));
        assert_eq!(media.filesize, Some(5));
    }

    #[tokio::test]
    async fn test_from_file_path_missing() {
        let err = MessageMedia::from_file_path("/definitely/not/here.png")
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::WhatsAppErrorCode::MediaError);
    }

    #[tokio::test]
    async fn test_from_url_rejects_garbage() {
        let http = reqwest::Client::new();
        let err = MessageMedia::from_url(&http, "not a url").await.unwrap_err();
        assert_eq!(err.code, crate::error::WhatsAppErrorCode::InvalidParameter);
    }
}
