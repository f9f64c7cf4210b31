//! Transient on-disk storage for multipart uploads.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

/// A file written by [`UploadStore::save`]. Call [`StoredUpload::remove`]
/// once the send attempt is over.
#[derive(Debug)]
pub struct StoredUpload {
    pub path: PathBuf,
    /// Name the client uploaded the file under.
    pub original_name: String,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` as `<unix-millis>-<random hex>-<original name>`,
    /// creating the directory when missing. Never overwrites an existing file.
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> std::io::Result<StoredUpload> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let original_name = sanitize_filename(original_name);
        let mut attempt = 0;
        let (path, mut file) = loop {
            attempt += 1;
            let stamp = chrono::Utc::now().timestamp_millis();
            let path = self.dir.join(format!(
                "{}-{:08x}-{}",
                stamp,
                rand::random::<u32>(),
                original_name
            ));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 5 => continue,
                Err(e) => return Err(e),
            }
        };

        file.write_all(bytes).await?;
        file.flush().await?;
        debug!(path = %path.display(), size = bytes.len(), "Stored upload");

        Ok(StoredUpload {
            path,
            original_name,
        })
    }
}

impl StoredUpload {
    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), "Failed to remove upload: {}", e);
        }
    }
}

/// Keep only the final path component and drop characters that are unsafe in
/// file names.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\tmp\\a?b.png"), "a_b.png");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
    }

    #[tokio::test]
    async fn test_save_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("nested"));

        let stored = store.save("report.pdf", b"%PDF-1.4").await.unwrap();
        assert!(stored.path.exists());
        assert_eq!(stored.original_name, "report.pdf");
        let stored_name = stored.path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(stored_name.ends_with("-report.pdf"));
        assert!(stored_name.split('-').next().unwrap().parse::<i64>().is_ok());

        let path = stored.path.clone();
        stored.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_same_name_uploads_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path());

        let (a, b) = tokio::join!(
            store.save("photo.jpg", b"first"),
            store.save("photo.jpg", b"second")
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.path, b.path);

        let b_path = b.path.clone();
        a.remove().await;
        assert_eq!(std::fs::read(&b_path).unwrap(), b"second");
        b.remove().await;
    }
}
