// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, Response};
use serde::Serialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;
use crate::utils::retry::{RetryPolicy, retry};

/// Fetches remote resources for the relay and the pipelines.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download a resource body. Empty bodies are returned as-is.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Download a resource and decode it as UTF-8 text.
    async fn get_text(&self, url: &str) -> Result<String> {
        let bytes = self.get_bytes(url).await?;
        String::from_utf8(bytes).map_err(|e| AppError::fetch(url, e))
    }
}

/// Create a configured asynchronous HTTP client.
///
/// Redirects are followed and gzip/deflate/brotli bodies decoded by the
/// client itself.
pub fn create_async_client(config: &CrawlerConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(10))
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()?;
    Ok(client)
}

/// `Referer` value for a target: its origin with a trailing slash.
pub fn referer_for(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin
        .is_tuple()
        .then(|| format!("{}/", origin.ascii_serialization()))
}

/// Retrying HTTP fetcher shared by every network-facing component.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    media_timeout: Duration,
    policy: RetryPolicy,
    cookie: Option<String>,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            media_timeout: Duration::from_secs(config.media_timeout_secs),
            policy: RetryPolicy::linear(
                config.max_attempts,
                Duration::from_millis(config.retry_delay_ms),
            ),
            cookie: config.cookie.clone(),
        })
    }

    /// Underlying client, for callers that build their own requests.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn default_headers(&self, url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = referer_for(url).and_then(|r| HeaderValue::from_str(&r).ok()) {
            headers.insert(REFERER, value);
        }
        if let Some(value) = self
            .cookie
            .as_deref()
            .and_then(|c| HeaderValue::from_str(c).ok())
        {
            headers.insert(COOKIE, value);
        }
        headers
    }

    async fn get_once(&self, url: &str, timeout: Option<Duration>) -> Result<Response> {
        let mut request = self.client.get(url).headers(self.default_headers(url));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// GET a page as text with the regular timeout.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        retry(&self.policy, url, |_| async move {
            Ok(self.get_once(url, None).await?.text().await?)
        })
        .await
    }

    /// POST a JSON body, returning the status code and raw response text.
    ///
    /// Non-2xx statuses are not errors here; callers decide from the body.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<(u16, String)> {
        let response = self
            .client
            .post(url)
            .headers(headers)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl Downloader for HttpFetcher {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let timeout = self.media_timeout;
        retry(&self.policy, url, |_| async move {
            let response = self.get_once(url, Some(timeout)).await?;
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referer_for() {
        assert_eq!(
            referer_for("https://cdn.example.com/videos/a/index.m3u8?t=1"),
            Some("https://cdn.example.com/".to_string())
        );
        assert_eq!(
            referer_for("http://example.com:8080/x"),
            Some("http://example.com:8080/".to_string())
        );
        assert_eq!(referer_for("not a url"), None);
    }

    #[test]
    fn test_fetcher_builds_from_default_config() {
        let fetcher = HttpFetcher::new(&CrawlerConfig::default()).unwrap();
        assert_eq!(fetcher.policy().max_attempts, 3);
        assert_eq!(fetcher.media_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_default_headers_include_cookie() {
        let config = CrawlerConfig {
            cookie: Some("session=abc".into()),
            ..CrawlerConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let headers = fetcher.default_headers("https://example.com/post/1");
        assert_eq!(headers.get(COOKIE).unwrap(), "session=abc");
        assert_eq!(headers.get(REFERER).unwrap(), "https://example.com/");
    }
}
