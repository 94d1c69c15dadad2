//! Local filesystem media store.
//!
//! Objects land under `{root}/{key}`; used for development, dry runs and
//! tests. Production deployments upload through the worker or S3 stores.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{MediaStore, UploadOutcome, public_url};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
    public_base_url: Option<String>,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Full path for a key. Keys may not escape the root.
    fn path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::storage(format!("invalid object key: {key}")));
        }
        Ok(self.root_dir.join(relative))
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read an object back, returning None if it doesn't exist.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl MediaStore for LocalStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        target_path: &str,
        content_type: &str,
    ) -> Result<UploadOutcome> {
        let path = self.path(target_path)?;
        self.write_bytes(&path, &bytes).await?;
        log::debug!(
            "Stored {} ({} bytes, {}) at {}",
            target_path,
            bytes.len(),
            content_type,
            path.display()
        );
        Ok(UploadOutcome {
            resource_key: target_path.trim_start_matches('/').to_string(),
            public_url: public_url(self.public_base_url.as_deref(), target_path),
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), Some("https://cdn.example".into()));

        let outcome = store
            .upload(
                b"#EXTM3U".to_vec(),
                "videos/202401/05/9/video_0/index.m3u8",
                "application/vnd.apple.mpegurl",
            )
            .await
            .unwrap();

        assert_eq!(outcome.resource_key, "videos/202401/05/9/video_0/index.m3u8");
        assert_eq!(
            outcome.public_url.as_deref(),
            Some("https://cdn.example/videos/202401/05/9/video_0/index.m3u8")
        );
        let stored = store
            .read("videos/202401/05/9/video_0/index.m3u8")
            .await
            .unwrap();
        assert_eq!(stored.as_deref(), Some(&b"#EXTM3U"[..]));
    }

    #[tokio::test]
    async fn test_upload_overwrites_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), None);
        store.upload(b"one".to_vec(), "a/b.ts", "video/mp2t").await.unwrap();
        store.upload(b"two".to_vec(), "a/b.ts", "video/mp2t").await.unwrap();
        assert_eq!(store.read("a/b.ts").await.unwrap().unwrap(), b"two");
        assert!(!dir.path().join("a/b.ts.tmp").exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), None);
        let result = store.upload(b"x".to_vec(), "../outside.txt", "text/plain").await;
        assert!(matches!(result, Err(AppError::Storage(_))));
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), None);
        assert!(store.read("nothing/here").await.unwrap().is_none());
    }
}
