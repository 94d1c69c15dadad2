// src/services/source.rs

//! Content sources and page fetching.
//!
//! A [`ContentSource`] yields list entries and detail payloads for one
//! site. Sources read pages through a [`PageFetcher`], which hands out a
//! [`PageSession`] per batch of fetches. [`with_session`] scopes a session
//! so it is closed on every exit path.

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ItemDetail, RawItem};
use crate::utils::http::HttpFetcher;

/// A navigable category on a source site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub children: Vec<Category>,
}

/// Narrowing applied to a list page.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Keep only entries whose title contains this text
    pub keyword: Option<String>,
    /// Keep at most this many entries
    pub limit: Option<usize>,
}

impl ListFilter {
    /// Apply the filter to list entries in page order.
    pub fn apply(&self, items: Vec<RawItem>) -> Vec<RawItem> {
        let keyword = self
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());
        let filtered = items
            .into_iter()
            .filter(|item| keyword.is_none_or(|k| item.title.contains(k)));
        match self.limit {
            Some(limit) => filtered.take(limit).collect(),
            None => filtered.collect(),
        }
    }
}

/// Site-specific listing and detail extraction.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch and parse a detail page.
    async fn fetch_detail(&self, url: &str) -> Result<ItemDetail>;

    /// Top-level categories with their children.
    async fn list_categories(&self) -> Result<Vec<Category>>;

    /// Entries on page `page` (1-based) of a category.
    async fn list_page(
        &self,
        category: &Category,
        page: u32,
        filter: &ListFilter,
    ) -> Result<Vec<RawItem>>;

    /// Playable audio URL on an episode page, when the source can find one.
    async fn resolve_audio_url(&self, episode_url: &str) -> Result<Option<String>> {
        log::debug!("No audio resolution for {}", episode_url);
        Ok(None)
    }
}

/// One open page-fetching session, e.g. a browser tab or a cookie jar.
#[async_trait]
pub trait PageSession: Send {
    /// Load a page and return its HTML.
    async fn get_html(&mut self, url: &str) -> Result<String>;

    /// Release the session's resources.
    async fn close(&mut self) -> Result<()>;
}

/// Hands out page sessions.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn PageSession>>;
}

/// Run `f` with a fresh session and close the session afterwards.
///
/// `f` returns the session alongside its result so ownership comes back
/// for closing. A close failure is logged and does not replace the result.
pub async fn with_session<T, F, Fut>(fetcher: &dyn PageFetcher, f: F) -> Result<T>
where
    F: FnOnce(Box<dyn PageSession>) -> Fut,
    Fut: Future<Output = (Box<dyn PageSession>, Result<T>)>,
{
    let session = fetcher.open_session().await?;
    let (mut session, result) = f(session).await;
    if let Err(e) = session.close().await {
        log::warn!("Failed to close page session: {}", e);
    }
    result
}

/// Fetch a single page in its own session.
pub async fn fetch_page(fetcher: &dyn PageFetcher, url: &str) -> Result<String> {
    let url = url.to_string();
    with_session(fetcher, |mut session| async move {
        let result = session.get_html(&url).await;
        (session, result)
    })
    .await
}

/// Plain HTTP page fetcher.
#[derive(Clone)]
pub struct HttpPageFetcher {
    fetcher: HttpFetcher,
}

impl HttpPageFetcher {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

struct HttpPageSession {
    fetcher: HttpFetcher,
    pages: usize,
}

#[async_trait]
impl PageSession for HttpPageSession {
    async fn get_html(&mut self, url: &str) -> Result<String> {
        self.pages += 1;
        self.fetcher.fetch_text(url).await
    }

    async fn close(&mut self) -> Result<()> {
        log::debug!("Closing HTTP page session after {} pages", self.pages);
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn open_session(&self) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(HttpPageSession {
            fetcher: self.fetcher.clone(),
            pages: 0,
        }))
    }
}
