//! Object store abstractions for relayed media.
//!
//! Every uploaded object is addressed by a slash-separated key:
//!
//! ```text
//! videos/{YYYYMM}/{DD}/{id}/cover.jpg
//! videos/{YYYYMM}/{DD}/{id}/video_{n}/{index.m3u8,ts.key,segment_NNN.ts}
//! uploads/{ts}_{rand}_{ts}_{rand}.{ext}
//! audio-novels/{YYYYMM}/{DD}/{id}/{cover.ext,chapter_NNN.mp3}
//! ```

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;
pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{StorageBackend, StorageConfig};

// Re-export for convenience
pub use local::LocalStore;
#[cfg(feature = "s3")]
pub use s3::S3Store;
pub use worker::WorkerStore;

/// MIME types used for relayed objects.
pub mod content_types {
    pub const JPEG: &str = "image/jpeg";
    pub const MP4: &str = "video/mp4";
    pub const MPEG_TS: &str = "video/mp2t";
    pub const HLS_MANIFEST: &str = "application/vnd.apple.mpegurl";
    pub const HLS_KEY: &str = "text/plain";
    pub const MP3: &str = "audio/mpeg";

    /// Content type for an image extension as produced by `image_extension`.
    pub fn for_image_ext(ext: &str) -> String {
        match ext {
            "jpg" | "jpeg" => JPEG.to_string(),
            other => format!("image/{other}"),
        }
    }
}

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Key the backend should store
    pub resource_key: String,
    /// Preview URL when the store exposes one
    pub public_url: Option<String>,
}

/// Trait for media object stores.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `bytes` under `target_path`.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        target_path: &str,
        content_type: &str,
    ) -> Result<UploadOutcome>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Broad media class of a content type, as upload workers expect it.
pub fn media_kind(content_type: &str) -> &'static str {
    if content_type.starts_with("image/") {
        "image"
    } else if content_type.starts_with("audio/") {
        "audio"
    } else {
        "video"
    }
}

/// Join a public base URL and an object key.
pub fn public_url(base: Option<&str>, key: &str) -> Option<String> {
    base.map(|b| format!("{}/{}", b.trim_end_matches('/'), key.trim_start_matches('/')))
}

/// Build the configured store.
pub async fn build_store(
    config: &StorageConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn MediaStore>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalStore::new(
            &config.local_root,
            config.public_base_url.clone(),
        ))),
        StorageBackend::Worker => Ok(Arc::new(WorkerStore::new(
            client,
            config.worker_url.clone(),
        ))),
        #[cfg(feature = "s3")]
        StorageBackend::S3 => Ok(Arc::new(S3Store::from_config(config).await?)),
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => Err(crate::error::AppError::config(
            "storage.backend = \"s3\" requires the `s3` feature",
        )),
    }
}
