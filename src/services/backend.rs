// src/services/backend.rs

//! Client for the sync backend.
//!
//! Endpoints (all `POST`, JSON):
//!
//! - `/api/crawler/post/exists-batch`, `/api/crawler/post/sync`
//! - `/api/crawler/audio-novel/exists-batch`, `/api/crawler/audio-novel/sync`,
//!   `/api/crawler/audio-novel/chapter/sync`
//!
//! Upserts are keyed by `source_id` on the server side.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    AudioChapterRecord, AudioNovelRecord, BackendConfig, ExistsStatus, SyncEnvelope, SyncRecord,
    SyncResponse,
};
use crate::utils::http::HttpFetcher;

const POST_BASE: &str = "/api/crawler/post";
const AUDIO_BASE: &str = "/api/crawler/audio-novel";

/// Operations the pipelines need from the backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Which of `ids` already exist as posts.
    async fn exists_batch(&self, ids: &[u64]) -> Result<HashMap<u64, ExistsStatus>>;

    /// Upsert a post. A rejected record is `Ok` with `success == false`.
    async fn sync(&self, record: &SyncRecord) -> Result<SyncResponse>;

    /// Which of `ids` already exist as audio novels.
    async fn audio_exists_batch(&self, ids: &[u64]) -> Result<HashMap<u64, ExistsStatus>>;

    async fn sync_audio_novel(&self, record: &AudioNovelRecord) -> Result<SyncResponse>;

    async fn sync_audio_chapter(&self, record: &AudioChapterRecord) -> Result<SyncResponse>;
}

#[derive(Debug, Serialize)]
struct ExistsQuery<I: Serialize> {
    items: Vec<ExistsQueryItem<I>>,
}

#[derive(Debug, Serialize)]
struct ExistsQueryItem<I: Serialize> {
    id: I,
    title: &'static str,
}

#[derive(Debug, Deserialize)]
struct ExistsReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    items: Vec<ExistsReplyItem>,
}

#[derive(Debug, Deserialize)]
struct ExistsReplyItem {
    id: Value,
    #[serde(default)]
    exists: bool,
    #[serde(default, alias = "novel_id")]
    post_id: Option<u64>,
}

/// Ids come back as numbers or numeric strings depending on the endpoint.
fn value_as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an exists-batch reply body.
fn parse_exists_reply(body: &str) -> Result<HashMap<u64, ExistsStatus>> {
    let reply: ExistsReply = serde_json::from_str(body)?;
    if !reply.success {
        return Err(AppError::backend(
            reply.message.unwrap_or_else(|| "exists check failed".into()),
        ));
    }
    Ok(reply
        .items
        .into_iter()
        .filter_map(|item| {
            let id = value_as_id(&item.id)?;
            Some((
                id,
                ExistsStatus {
                    exists: item.exists,
                    remote_id: item.post_id,
                },
            ))
        })
        .collect())
}

/// Interpret an upsert reply. Non-200 statuses become a failed response
/// carrying the body's message or `HTTP {status}`.
fn parse_sync_reply(status: u16, body: &str) -> SyncResponse {
    let envelope: Option<SyncEnvelope> = serde_json::from_str(body).ok();
    if status != 200 {
        let message = envelope
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return SyncResponse {
            success: false,
            message: Some(message),
            ..SyncResponse::default()
        };
    }
    match envelope {
        Some(env) => env.into(),
        None => SyncResponse {
            success: false,
            message: Some("unparseable sync response".into()),
            ..SyncResponse::default()
        },
    }
}

/// HTTP implementation of [`BackendClient`].
#[derive(Clone)]
pub struct HttpBackendClient {
    fetcher: HttpFetcher,
    base_url: String,
    headers: HeaderMap,
    timeout: Duration,
}

impl HttpBackendClient {
    pub fn new(fetcher: HttpFetcher, config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            fetcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: auth_headers(config)?,
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn endpoint(&self, base: &str, path: &str) -> String {
        format!("{}{}/{}", self.base_url, base, path)
    }

    async fn exists<I: Serialize + Send + Sync>(
        &self,
        base: &str,
        ids: Vec<I>,
    ) -> Result<HashMap<u64, ExistsStatus>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.endpoint(base, "exists-batch");
        let query = ExistsQuery {
            items: ids
                .into_iter()
                .map(|id| ExistsQueryItem { id, title: "" })
                .collect(),
        };
        let (status, body) = self
            .fetcher
            .post_json(&url, &query, self.headers.clone(), self.timeout)
            .await?;
        if status != 200 {
            return Err(AppError::Status { status, url });
        }
        parse_exists_reply(&body)
    }

    async fn upsert<R: Serialize + Sync>(
        &self,
        base: &str,
        path: &str,
        record: &R,
    ) -> Result<SyncResponse> {
        let url = self.endpoint(base, path);
        let (status, body) = self
            .fetcher
            .post_json(&url, record, self.headers.clone(), self.timeout)
            .await?;
        let response = parse_sync_reply(status, &body);
        if !response.success {
            log::warn!(
                "Sync rejected by {}: {}",
                url,
                response.message.as_deref().unwrap_or("no message")
            );
        }
        Ok(response)
    }
}

/// `X-CRAWLER-TOKEN` / `Authorization: Bearer` use the crawler token, or
/// the auth uuid when no token is configured; `X-AUTH-UUID` is sent when set.
pub fn auth_headers(config: &BackendConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let header_value = |v: &str| {
        HeaderValue::from_str(v).map_err(|e| AppError::config(format!("bad header value: {e}")))
    };

    let token = config
        .crawler_token
        .as_deref()
        .or(config.auth_uuid.as_deref())
        .filter(|t| !t.is_empty());
    if let Some(token) = token {
        headers.insert(HeaderName::from_static("x-crawler-token"), header_value(token)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
    }
    if let Some(uuid) = config.auth_uuid.as_deref().filter(|u| !u.is_empty()) {
        headers.insert(HeaderName::from_static("x-auth-uuid"), header_value(uuid)?);
    }
    Ok(headers)
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn exists_batch(&self, ids: &[u64]) -> Result<HashMap<u64, ExistsStatus>> {
        self.exists(POST_BASE, ids.to_vec()).await
    }

    async fn sync(&self, record: &SyncRecord) -> Result<SyncResponse> {
        self.upsert(POST_BASE, "sync", record).await
    }

    async fn audio_exists_batch(&self, ids: &[u64]) -> Result<HashMap<u64, ExistsStatus>> {
        self.exists(AUDIO_BASE, ids.iter().map(|id| id.to_string()).collect())
            .await
    }

    async fn sync_audio_novel(&self, record: &AudioNovelRecord) -> Result<SyncResponse> {
        self.upsert(AUDIO_BASE, "sync", record).await
    }

    async fn sync_audio_chapter(&self, record: &AudioChapterRecord) -> Result<SyncResponse> {
        self.upsert(AUDIO_BASE, "chapter/sync", record).await
    }
}
