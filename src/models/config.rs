// src/models/config.rs

//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP fetch behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Task queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Media relay settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Object store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sync backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Content transform settings
    #[serde(default)]
    pub content: ContentConfig,

    /// Image decryption settings
    #[serde(default)]
    pub decrypt: DecryptConfig,

    /// Detail page extraction strategies
    #[serde(default)]
    pub extract: ExtractConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.media_timeout_secs == 0 {
            return Err(AppError::validation(
                "crawler.media_timeout_secs must be > 0",
            ));
        }
        if self.crawler.max_attempts == 0 {
            return Err(AppError::validation("crawler.max_attempts must be > 0"));
        }
        if self.queue.max_concurrent == 0 {
            return Err(AppError::validation("queue.max_concurrent must be > 0"));
        }
        if self.queue.probe_timeout_ms == 0 {
            return Err(AppError::validation("queue.probe_timeout_ms must be > 0"));
        }
        if self.relay.max_workers == 0 {
            return Err(AppError::validation("relay.max_workers must be > 0"));
        }
        if self.backend.title_max_len == 0 {
            return Err(AppError::validation("backend.title_max_len must be > 0"));
        }
        match self.storage.backend {
            StorageBackend::Worker if self.storage.worker_url.trim().is_empty() => {
                return Err(AppError::validation(
                    "storage.worker_url is required for the worker backend",
                ));
            }
            StorageBackend::S3 if self.storage.bucket.trim().is_empty() => {
                return Err(AppError::validation(
                    "storage.bucket is required for the s3 backend",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Validate the fields needed to talk to the sync backend.
    pub fn validate_backend(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(AppError::validation("backend.base_url is empty"));
        }
        url::Url::parse(&self.backend.base_url)?;
        if self.backend.sync_uid.trim().is_empty() {
            return Err(AppError::validation("backend.sync_uid is empty"));
        }
        Ok(())
    }
}

/// HTTP client and fetch behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds for pages and API calls
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Longer timeout for media downloads and uploads
    #[serde(default = "defaults::media_timeout")]
    pub media_timeout_secs: u64,

    /// Attempts per generic download before giving up
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts; grows linearly with the attempt number
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_ms: u64,

    /// Accept self-signed certificates on media hosts
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Optional cookie header sent with page requests
    #[serde(default)]
    pub cookie: Option<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            media_timeout_secs: defaults::media_timeout(),
            max_attempts: defaults::max_attempts(),
            retry_delay_ms: defaults::retry_delay(),
            accept_invalid_certs: false,
            cookie: None,
        }
    }
}

/// Task queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum tasks executing at once
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Timeout for the pre-flight existence probe
    #[serde(default = "defaults::probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
            probe_timeout_ms: defaults::probe_timeout(),
        }
    }
}

/// Media relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Segment batch size for downloads and uploads
    #[serde(default = "defaults::max_workers")]
    pub max_workers: usize,

    /// Serial retry passes over failed segment indices
    #[serde(default = "defaults::retry_passes")]
    pub retry_passes: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_workers: defaults::max_workers(),
            retry_passes: defaults::retry_passes(),
        }
    }
}

/// Which object store implementation receives uploads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files under a local directory
    #[default]
    Local,
    /// Multipart POST to an upload worker in front of the bucket
    Worker,
    /// Direct S3-compatible API (requires the `s3` feature)
    S3,
}

/// Object store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the local backend
    #[serde(default = "defaults::local_root")]
    pub local_root: PathBuf,

    /// Upload endpoint for the worker backend
    #[serde(default)]
    pub worker_url: String,

    /// Bucket name for the s3 backend
    #[serde(default)]
    pub bucket: String,

    /// Custom endpoint (e.g. an R2 account endpoint) for the s3 backend
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Key prefix prepended to every object for the s3 backend
    #[serde(default)]
    pub prefix: String,

    /// Public base URL used to build preview links
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            local_root: defaults::local_root(),
            worker_url: String::new(),
            bucket: String::new(),
            endpoint: None,
            prefix: String::new(),
            public_base_url: None,
        }
    }
}

/// Sync backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend, e.g. `https://api.example.com`
    #[serde(default)]
    pub base_url: String,

    /// Bearer token, also sent as `X-CRAWLER-TOKEN`
    #[serde(default)]
    pub crawler_token: Option<String>,

    /// Secondary identity header `X-AUTH-UUID`
    #[serde(default)]
    pub auth_uuid: Option<String>,

    /// Owning user id attached to every record
    #[serde(default)]
    pub sync_uid: String,

    /// Role code assigned to synced posts
    #[serde(default = "defaults::role_code")]
    pub role_code: String,

    /// Visibility of newly synced posts
    #[serde(default = "defaults::visibility")]
    pub visibility: String,

    /// Titles are truncated to this many characters
    #[serde(default = "defaults::title_max_len")]
    pub title_max_len: usize,

    /// Timeout for backend calls in seconds
    #[serde(default = "defaults::backend_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            crawler_token: None,
            auth_uuid: None,
            sync_uid: String::new(),
            role_code: defaults::role_code(),
            visibility: defaults::visibility(),
            title_max_len: defaults::title_max_len(),
            request_timeout_secs: defaults::backend_timeout(),
        }
    }
}

/// Content transform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Base URL used to absolutize relative image references in bodies
    #[serde(default)]
    pub site_base_url: Option<String>,

    /// Attributes consulted, in order, for an image's original URL
    #[serde(default = "defaults::image_attrs")]
    pub image_attrs: Vec<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            site_base_url: None,
            image_attrs: defaults::image_attrs(),
        }
    }
}

/// AES key material for encrypted images, in `NN_NN_...` char-code form.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DecryptConfig {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub iv: Option<String>,
}

/// Ordered selector strategies for the generic HTML detail extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "defaults::title_selectors")]
    pub title_selectors: Vec<String>,

    #[serde(default = "defaults::body_selectors")]
    pub body_selectors: Vec<String>,

    /// Elements whose `data-config` / `data-src` / `src` may hold a video URL
    #[serde(default = "defaults::video_selectors")]
    pub video_selectors: Vec<String>,

    /// Cover image strategies; `meta` elements are read from `content`
    #[serde(default = "defaults::cover_selectors")]
    pub cover_selectors: Vec<String>,

    /// Elements whose text carries view/like/comment counters
    #[serde(default = "defaults::stats_selectors")]
    pub stats_selectors: Vec<String>,

    #[serde(default = "defaults::published_selectors")]
    pub published_selectors: Vec<String>,

    /// Image URL substrings that mark lazy-load placeholders
    #[serde(default = "defaults::placeholder_keywords")]
    pub placeholder_keywords: Vec<String>,

    /// Navigation menus holding category links, first match wins
    #[serde(default = "defaults::nav_selectors")]
    pub nav_selectors: Vec<String>,

    /// Item containers on a list page, first selector with matches wins
    #[serde(default = "defaults::list_item_selectors")]
    pub list_item_selectors: Vec<String>,

    /// Title element inside a list item
    #[serde(default = "defaults::list_title_selector")]
    pub list_title_selector: String,

    /// Category names never offered for sync
    #[serde(default)]
    pub exclude_categories: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            title_selectors: defaults::title_selectors(),
            body_selectors: defaults::body_selectors(),
            video_selectors: defaults::video_selectors(),
            cover_selectors: defaults::cover_selectors(),
            stats_selectors: defaults::stats_selectors(),
            published_selectors: defaults::published_selectors(),
            placeholder_keywords: defaults::placeholder_keywords(),
            nav_selectors: defaults::nav_selectors(),
            list_item_selectors: defaults::list_item_selectors(),
            list_title_selector: defaults::list_title_selector(),
            exclude_categories: Vec::new(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn media_timeout() -> u64 {
        300
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn retry_delay() -> u64 {
        1000
    }

    // Queue defaults
    pub fn max_concurrent() -> usize {
        3
    }
    pub fn probe_timeout() -> u64 {
        5000
    }

    // Relay defaults
    pub fn max_workers() -> usize {
        5
    }
    pub fn retry_passes() -> u32 {
        3
    }

    // Storage defaults
    pub fn local_root() -> PathBuf {
        PathBuf::from("storage/media")
    }

    // Backend defaults
    pub fn role_code() -> String {
        "jianzhi".into()
    }
    pub fn visibility() -> String {
        "public".into()
    }
    pub fn title_max_len() -> usize {
        255
    }
    pub fn backend_timeout() -> u64 {
        60
    }

    // Content defaults
    pub fn image_attrs() -> Vec<String> {
        vec!["data-xkrkllgl".into(), "src".into(), "data-src".into()]
    }

    // Extraction defaults
    pub fn title_selectors() -> Vec<String> {
        vec!["h1.post-title".into(), "h1".into(), ".post-title".into()]
    }
    pub fn body_selectors() -> Vec<String> {
        vec![
            "div.post-content".into(),
            "article.post".into(),
            ".post-content".into(),
        ]
    }
    pub fn video_selectors() -> Vec<String> {
        vec!["div.dplayer".into(), "video source".into(), "video".into()]
    }
    pub fn cover_selectors() -> Vec<String> {
        vec![
            "meta[property='og:image']".into(),
            "div.post-content img".into(),
            "article.post img".into(),
        ]
    }
    pub fn stats_selectors() -> Vec<String> {
        vec![".post-stats".into(), ".post-meta".into()]
    }
    pub fn published_selectors() -> Vec<String> {
        vec!["[itemprop='datePublished']".into(), "time[datetime]".into()]
    }
    pub fn placeholder_keywords() -> Vec<String> {
        vec![
            "loading".into(),
            "placeholder".into(),
            "preload".into(),
            "lazy".into(),
        ]
    }

    pub fn nav_selectors() -> Vec<String> {
        vec!["nav ul".into(), ".nav-menu".into(), "header nav ul".into()]
    }
    pub fn list_item_selectors() -> Vec<String> {
        vec![
            "article".into(),
            ".post".into(),
            ".item".into(),
            ".content-item".into(),
            ".list-item".into(),
            ".video-item".into(),
            ".entry".into(),
        ]
    }
    pub fn list_title_selector() -> String {
        "h2, h3, .title, .post-title, .entry-title".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.queue.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_worker_url_for_worker_backend() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Worker;
        assert!(config.validate().is_err());
        config.storage.worker_url = "https://upload.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_backend_requires_uid() {
        let mut config = Config::default();
        config.backend.base_url = "https://api.example.com".to_string();
        assert!(config.validate_backend().is_err());
        config.backend.sync_uid = "42".to_string();
        assert!(config.validate_backend().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            max_concurrent = 8

            [storage]
            backend = "worker"
            worker_url = "https://upload.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.max_concurrent, 8);
        assert_eq!(config.queue.probe_timeout_ms, 5000);
        assert_eq!(config.relay.max_workers, 5);
        assert_eq!(config.storage.backend, StorageBackend::Worker);
        assert_eq!(config.backend.title_max_len, 255);
    }
}
