//! Upload worker media store.
//!
//! Posts each object as `multipart/form-data` to an upload worker sitting
//! in front of the bucket. Form fields:
//!
//! - `file`: the bytes, named after the key's final segment
//! - `type`: `image`, `video` or `audio`
//! - `key`: the full target key
//!
//! The worker answers `{success, data: {filePath|resourceKey|fileName|key,
//! previewUrl|url}}` or the flat `{success, key, url}`.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::storage::{MediaStore, UploadOutcome, media_kind};
use crate::utils::url::basename;

#[derive(Debug, Default, Deserialize)]
struct WorkerData {
    #[serde(rename = "filePath")]
    file_path: Option<String>,
    #[serde(rename = "resourceKey")]
    resource_key: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
    key: Option<String>,
    #[serde(rename = "previewUrl")]
    preview_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<WorkerData>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl WorkerResponse {
    /// Returned key and preview URL, nested form first.
    fn key_and_url(self) -> (Option<String>, Option<String>) {
        match self.data {
            Some(d) => (
                d.file_path.or(d.resource_key).or(d.file_name).or(d.key),
                d.preview_url.or(d.url),
            ),
            None => (self.key, self.url),
        }
    }
}

/// Media store backed by an HTTP upload worker.
#[derive(Clone)]
pub struct WorkerStore {
    client: Client,
    upload_url: String,
}

impl WorkerStore {
    pub fn new(client: Client, upload_url: impl Into<String>) -> Self {
        Self {
            client,
            upload_url: upload_url.into(),
        }
    }

    /// Parse a worker response body into an outcome for `target_path`.
    ///
    /// Workers sometimes echo only a file name; a returned key that does
    /// not share the target's top-level prefix is replaced by the target.
    fn parse_response(body: &str, target_path: &str) -> Result<UploadOutcome> {
        let response: WorkerResponse = serde_json::from_str(body)?;
        if !response.success {
            return Err(AppError::storage(
                response
                    .message
                    .unwrap_or_else(|| format!("upload of {target_path} rejected")),
            ));
        }

        let (key, url) = response.key_and_url();
        let root = target_path
            .split_once('/')
            .map(|(root, _)| format!("{root}/"))
            .unwrap_or_default();
        let resource_key = key
            .filter(|k| !k.is_empty() && (root.is_empty() || k.starts_with(&root)))
            .unwrap_or_else(|| target_path.to_string());

        Ok(UploadOutcome {
            resource_key,
            public_url: url.filter(|u| !u.is_empty()),
        })
    }
}

#[async_trait]
impl MediaStore for WorkerStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        target_path: &str,
        content_type: &str,
    ) -> Result<UploadOutcome> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(basename(target_path).to_string())
            .mime_str(content_type)?;
        let form = Form::new()
            .part("file", part)
            .text("type", media_kind(content_type))
            .text("key", target_path.to_string());

        log::debug!("Uploading {} ({} bytes) to worker", target_path, size);
        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                url: self.upload_url.clone(),
            });
        }
        Self::parse_response(&body, target_path)
    }

    fn name(&self) -> &'static str {
        "worker"
    }
}
