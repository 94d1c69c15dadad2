//! S3-compatible media store.
//!
//! Works against AWS S3 and R2-style endpoints (custom endpoint plus
//! path-style addressing). Credentials come from the usual AWS environment.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};
use crate::models::StorageConfig;
use crate::storage::{MediaStore, UploadOutcome, public_url};

/// S3-based media store.
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
    public_base_url: Option<String>,
}

impl S3Store {
    /// Create a new S3 store instance.
    pub fn new(
        client: Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            public_base_url,
        }
    }

    /// Create the store from configuration, with `S3_BUCKET` / `S3_PREFIX`
    /// environment variables filling blanks.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        let bucket = if config.bucket.is_empty() {
            std::env::var("S3_BUCKET")
                .map_err(|_| AppError::config("no S3 bucket configured (storage.bucket)"))?
        } else {
            config.bucket.clone()
        };
        let prefix = if config.prefix.is_empty() {
            std::env::var("S3_PREFIX").unwrap_or_default()
        } else {
            config.prefix.clone()
        };

        Ok(Self::new(
            client,
            bucket,
            prefix,
            config.public_base_url.clone(),
        ))
    }

    /// Full object key including the configured prefix.
    fn object_key(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }
}

#[async_trait]
impl MediaStore for S3Store {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        target_path: &str,
        content_type: &str,
    ) -> Result<UploadOutcome> {
        let key = self.object_key(target_path);
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::storage(format!("put s3://{}/{}: {}", self.bucket, key, e)))?;

        log::debug!("Wrote {} bytes to s3://{}/{}", size, self.bucket, key);
        Ok(UploadOutcome {
            resource_key: target_path.trim_start_matches('/').to_string(),
            public_url: public_url(self.public_base_url.as_deref(), &key),
        })
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
