// src/models/item.rs

//! Items discovered on a source site and their fetched details.

use serde::{Deserialize, Serialize};

use crate::utils::url::{extract_source_id, is_manifest_url, is_mp4_url, parse_local_id};

/// A list-page entry, consumed once by a sync task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawItem {
    /// Local identifier, unique within a batch (e.g. `item-42`)
    pub id: String,

    /// Upstream numeric id when the list page exposed it
    #[serde(default)]
    pub source_id: Option<u64>,

    #[serde(default)]
    pub title: String,

    /// Detail page URL
    pub url: String,

    #[serde(default)]
    pub cover_url: Option<String>,

    #[serde(default)]
    pub published_at: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    /// Body markup when the list already carried it
    #[serde(default)]
    pub body_html: Option<String>,

    #[serde(default)]
    pub image_urls: Vec<String>,

    #[serde(default)]
    pub video_urls: Vec<String>,

    /// Loose episode URLs for audio items
    #[serde(default)]
    pub audio_urls: Vec<String>,
}

impl RawItem {
    /// Best-effort numeric id: explicit id, then URL patterns, then the
    /// numeric part of the local id.
    pub fn resolve_source_id(&self) -> Option<u64> {
        self.source_id
            .filter(|id| *id > 0)
            .or_else(|| extract_source_id(&self.url))
            .or_else(|| parse_local_id(&self.id))
    }
}

/// Engagement counters reported by the detail page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Counters {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub purchases: u64,
}

/// One listed audio episode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Episode {
    #[serde(default)]
    pub id: Option<u64>,
    pub title: String,
    pub url: String,
    /// Seconds, when known
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default = "default_true")]
    pub is_free: bool,
}

fn default_true() -> bool {
    true
}

/// Audio-novel specific detail fields. Counts stay as display text
/// ("1.2W", "35K") and are parsed when the record is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AudioDetail {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub narrator: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub rating_text: Option<String>,
    #[serde(default)]
    pub listens_text: Option<String>,
    #[serde(default)]
    pub likes_text: Option<String>,
    #[serde(default)]
    pub favorites_text: Option<String>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(default)]
    pub audio_urls: Vec<String>,
}

/// Payload of a detail fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ItemDetail {
    #[serde(default)]
    pub source_id: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub body_html: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Ordered, distinct
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Ordered, distinct, manifests before MP4 files
    #[serde(default)]
    pub video_urls: Vec<String>,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub audio: Option<AudioDetail>,
}

impl ItemDetail {
    /// Deduplicate media lists and put HLS manifests ahead of MP4 files.
    /// URLs that are neither are kept after both groups.
    pub fn normalize_media(&mut self) {
        self.image_urls = distinct(std::mem::take(&mut self.image_urls));
        let videos = distinct(std::mem::take(&mut self.video_urls));
        let (manifests, rest): (Vec<_>, Vec<_>) =
            videos.into_iter().partition(|u| is_manifest_url(u));
        let (mp4s, other): (Vec<_>, Vec<_>) = rest.into_iter().partition(|u| is_mp4_url(u));
        self.video_urls = manifests.into_iter().chain(mp4s).chain(other).collect();
    }

    pub fn has_video(&self) -> bool {
        !self.video_urls.is_empty()
    }

    /// Fill gaps in this detail from the list entry it was fetched for.
    pub fn merge_item(&mut self, item: &RawItem) {
        if self.title.trim().is_empty() {
            self.title = item.title.clone();
        }
        if self.cover_url.is_none() {
            self.cover_url = item.cover_url.clone();
        }
        if self.published_at.is_none() {
            self.published_at = item.published_at.clone();
        }
        if self.body_html.trim().is_empty() {
            if let Some(body) = &item.body_html {
                self.body_html = body.clone();
            }
        }
        self.image_urls.extend(item.image_urls.iter().cloned());
        self.video_urls.extend(item.video_urls.iter().cloned());
        self.normalize_media();
    }
}

/// Keep the first occurrence of every non-empty entry.
pub fn distinct(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter()
        .filter(|u| !u.trim().is_empty())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, url: &str) -> RawItem {
        RawItem {
            id: id.into(),
            url: url.into(),
            ..RawItem::default()
        }
    }

    #[test]
    fn test_resolve_source_id_precedence() {
        let mut it = item("item-7", "https://site.example/archives/123");
        assert_eq!(it.resolve_source_id(), Some(123));

        it.source_id = Some(555);
        assert_eq!(it.resolve_source_id(), Some(555));

        let synthetic = item("item-7", "https://site.example/about");
        assert_eq!(synthetic.resolve_source_id(), Some(7));

        let none = item("abc", "https://site.example/about");
        assert_eq!(none.resolve_source_id(), None);
    }

    #[test]
    fn test_normalize_media_orders_manifests_first() {
        let mut detail = ItemDetail {
            video_urls: vec![
                "https://v.example/a.mp4".into(),
                "https://v.example/b/index.m3u8".into(),
                "https://v.example/a.mp4".into(),
                "https://v.example/stream".into(),
            ],
            image_urls: vec!["x.jpg".into(), "x.jpg".into(), "".into()],
            ..ItemDetail::default()
        };
        detail.normalize_media();
        assert_eq!(
            detail.video_urls,
            vec![
                "https://v.example/b/index.m3u8",
                "https://v.example/a.mp4",
                "https://v.example/stream"
            ]
        );
        assert_eq!(detail.image_urls, vec!["x.jpg"]);
    }

    #[test]
    fn test_merge_item_fills_gaps() {
        let mut detail = ItemDetail {
            title: " ".into(),
            ..ItemDetail::default()
        };
        let mut raw = item("item-1", "https://site.example/post/1");
        raw.title = "From list".into();
        raw.cover_url = Some("https://img.example/c.jpg".into());
        raw.video_urls = vec!["https://v.example/1.m3u8".into()];
        detail.merge_item(&raw);
        assert_eq!(detail.title, "From list");
        assert!(detail.has_video());
        assert_eq!(detail.cover_url.as_deref(), Some("https://img.example/c.jpg"));
    }

    #[test]
    fn test_raw_item_deserializes_with_defaults() {
        let raw: RawItem =
            serde_json::from_str(r#"{"id":"item-3","url":"https://site.example/post/3"}"#)
                .unwrap();
        assert_eq!(raw.resolve_source_id(), Some(3));
        assert!(raw.video_urls.is_empty());
    }
}
