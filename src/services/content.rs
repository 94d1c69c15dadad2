// src/services/content.rs

//! Rich-text rewrite of a detail body after media relay.
//!
//! Players and images are pointed at relayed resource keys, then the
//! markup is normalized for the backend editor: no nested paragraphs,
//! every image inside a paragraph, one `<p><br></p>` spacer after each
//! image paragraph and video, no empty paragraphs.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::utils::url::{resolve, strip_query};

static DPLAYER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?is)<div\b[^>]*\bclass\s*=\s*["'][^"']*\bdplayer\b[^"']*["'][^>]*>.*?</div>"#)
        .ok()
});
static VIDEO: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<video\b[^>]*>.*?</video>|<video\b[^>]*/>").ok());
static MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<!--relayed-video-(\d+)-->").ok());
static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)<!--.*?-->|<(/?)([a-zA-Z][a-zA-Z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)>"#)
        .ok()
});
static ATTR: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"([^\s=/>"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+)))?"#).ok()
});
static SPACER_RUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(?:<p><br\s*/?></p>\s*){2,}").ok());
static EMPTY_P: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)<p\b[^>]*>\s*</p>").ok());

const SPACER: &str = "<p><br></p>";
const VIDEO_STYLE: &str = "max-width: 400px; width: auto; height: auto; display: block; margin: 4px 0px; cursor: pointer; border-radius: 4px; transition: box-shadow 0.2s; object-fit: contain; box-shadow: none;";
const IMAGE_STYLE: &str = "cursor: grab;";
const STRIPPED_IMAGE_ATTRS: [&str; 9] = [
    "src",
    "data-src",
    "data-xkrkllgl",
    "data-original",
    "data-xuid",
    "alt",
    "title",
    "draggable",
    "style",
];

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Editor markup for a relayed video.
pub fn video_html(resource_key: &str, poster: Option<&str>) -> String {
    let key = escape_attr(resource_key);
    let mime = if resource_key.contains(".m3u8") {
        "application/x-mpegURL"
    } else {
        "video/mp4"
    };
    let poster = poster
        .map(|p| format!(" poster=\"{}\"", escape_attr(p)))
        .unwrap_or_default();
    format!(
        "<video controls=\"controls\" contenteditable=\"false\" data-hls-src=\"{key}\" src=\"{key}\"{poster} style=\"{VIDEO_STYLE}\">\n<source src=\"{key}\" type=\"{mime}\">\n</video>"
    )
}

/// Find the relayed key for an image URL: exact match, then the single
/// mapped URL that is equal once both query strings are dropped. Anything
/// else stays unresolved.
pub fn match_image<'m>(url: &str, images: &'m HashMap<String, String>) -> Option<&'m str> {
    if let Some(key) = images.get(url) {
        return Some(key);
    }
    let bare = strip_query(url);
    let mut candidates = images
        .iter()
        .filter(|(original, _)| strip_query(original) == bare)
        .map(|(_, key)| key.as_str());
    match (candidates.next(), candidates.next()) {
        (Some(key), None) => Some(key),
        _ => None,
    }
}

fn parse_attrs(raw: &str) -> Vec<(String, Option<String>)> {
    let Some(re) = ATTR.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(raw)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string());
            (caps[1].to_ascii_lowercase(), value)
        })
        .collect()
}

fn render_tag(name: &str, attrs: &[(String, Option<String>)]) -> String {
    let mut tag = format!("<{name}");
    for (key, value) in attrs {
        match value {
            Some(v) => tag.push_str(&format!(" {key}=\"{}\"", escape_attr(v))),
            None => tag.push_str(&format!(" {key}")),
        }
    }
    tag.push('>');
    tag
}

/// Inputs of one body rewrite.
pub struct ContentTransform<'a> {
    /// Page URL that relative image references resolve against
    pub base_url: &'a str,
    /// Attributes consulted, in order, for an image's original URL
    pub image_attrs: &'a [String],
    /// Original image URL to relayed key
    pub images: &'a HashMap<String, String>,
    /// Relayed video keys by discovery index; `None` failed to relay
    pub videos: &'a [Option<String>],
    /// Cover key, used as poster when the item has a single video
    pub cover_key: Option<&'a str>,
}

impl ContentTransform<'_> {
    /// Rewrite `html`. Pure; no I/O.
    pub fn apply(&self, html: &str) -> String {
        let html = self.replace_videos(html);
        let html = self.replace_images(&html);
        normalize(&html)
    }

    fn poster(&self) -> Option<&str> {
        (self.videos.len() == 1).then_some(self.cover_key).flatten()
    }

    /// DPlayer containers take video slots first, then `<video>` elements.
    /// A failed slot keeps its element; DPlayers beyond the slots are removed.
    fn replace_videos(&self, html: &str) -> String {
        let (Some(dplayer), Some(video), Some(marker)) =
            (DPLAYER.as_ref(), VIDEO.as_ref(), MARKER.as_ref())
        else {
            return html.to_string();
        };
        let mut slot = 0;

        let html = dplayer.replace_all(html, |caps: &Captures| {
            let index = slot;
            slot += 1;
            match self.videos.get(index) {
                Some(Some(_)) => format!("<!--relayed-video-{index}-->"),
                Some(None) => caps[0].to_string(),
                None => String::new(),
            }
        });
        let html = video.replace_all(&html, |caps: &Captures| {
            let index = slot;
            match self.videos.get(index) {
                Some(Some(_)) => {
                    slot += 1;
                    format!("<!--relayed-video-{index}-->")
                }
                Some(None) => {
                    slot += 1;
                    caps[0].to_string()
                }
                None => caps[0].to_string(),
            }
        });
        marker
            .replace_all(&html, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.videos.get(i).cloned().flatten())
                    .map(|key| video_html(&key, self.poster()))
                    .unwrap_or_default()
            })
            .into_owned()
    }

    fn replace_images(&self, html: &str) -> String {
        let Some(tag) = TAG.as_ref() else {
            return html.to_string();
        };
        tag.replace_all(html, |caps: &Captures| {
            let is_img = caps.get(2).is_some_and(|n| n.as_str().eq_ignore_ascii_case("img"))
                && caps.get(1).is_some_and(|c| c.as_str().is_empty());
            if !is_img {
                return caps[0].to_string();
            }
            let attrs = parse_attrs(caps.get(3).map_or("", |m| m.as_str()));
            self.rewrite_image(&attrs)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
    }

    /// Relayed images get the key as `src` and editor attributes; images
    /// that did not relay keep their original URL as `src`.
    fn rewrite_image(&self, attrs: &[(String, Option<String>)]) -> Option<String> {
        let original = self.image_attrs.iter().find_map(|name| {
            attrs
                .iter()
                .find(|(key, value)| key == name && value.as_deref().is_some_and(|v| !v.trim().is_empty()))
                .and_then(|(_, value)| value.clone())
        })?;
        let original = resolve(self.base_url, original.trim());

        match match_image(&original, self.images) {
            Some(key) => {
                let mut rewritten: Vec<(String, Option<String>)> = attrs
                    .iter()
                    .filter(|(name, _)| !STRIPPED_IMAGE_ATTRS.contains(&name.as_str()))
                    .cloned()
                    .collect();
                rewritten.push(("src".into(), Some(key.to_string())));
                rewritten.push(("draggable".into(), Some("true".into())));
                rewritten.push(("style".into(), Some(IMAGE_STYLE.into())));
                Some(render_tag("img", &rewritten))
            }
            None => {
                let current = attrs
                    .iter()
                    .find(|(name, _)| name == "src")
                    .and_then(|(_, v)| v.as_deref());
                if current == Some(original.as_str()) {
                    return None;
                }
                let mut kept: Vec<(String, Option<String>)> = attrs
                    .iter()
                    .filter(|(name, _)| name != "src")
                    .cloned()
                    .collect();
                kept.insert(0, ("src".into(), Some(original)));
                Some(render_tag("img", &kept))
            }
        }
    }
}

struct Paragraph {
    kept: bool,
    has_image: bool,
}

/// Structural cleanup of editor markup.
pub fn normalize(html: &str) -> String {
    let Some(tag) = TAG.as_ref() else {
        return html.to_string();
    };
    let mut out = String::with_capacity(html.len() + 64);
    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut last = 0;

    for caps in tag.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&html[last..whole.start()]);
        last = whole.end();

        let Some(name) = caps.get(2).map(|n| n.as_str().to_ascii_lowercase()) else {
            out.push_str(whole.as_str());
            continue;
        };
        let closing = caps.get(1).is_some_and(|c| !c.as_str().is_empty());

        match (name.as_str(), closing) {
            ("p", false) => {
                let nested = !paragraphs.is_empty();
                paragraphs.push(Paragraph {
                    kept: !nested,
                    has_image: false,
                });
                if !nested {
                    out.push_str(whole.as_str());
                }
            }
            ("p", true) => match paragraphs.pop() {
                Some(p) if p.kept => {
                    out.push_str(whole.as_str());
                    if p.has_image {
                        out.push_str(SPACER);
                    }
                }
                Some(_) => {}
                None => out.push_str(whole.as_str()),
            },
            ("img", false) => match paragraphs.first_mut() {
                Some(outer) => {
                    outer.has_image = true;
                    out.push_str(whole.as_str());
                }
                None => {
                    out.push_str("<p>");
                    out.push_str(whole.as_str());
                    out.push_str("</p>");
                    out.push_str(SPACER);
                }
            },
            ("video", true) => {
                out.push_str(whole.as_str());
                out.push_str(SPACER);
            }
            _ => out.push_str(whole.as_str()),
        }
    }
    out.push_str(&html[last..]);

    let out = match SPACER_RUN.as_ref() {
        Some(re) => re.replace_all(&out, SPACER).into_owned(),
        None => out,
    };
    match EMPTY_P.as_ref() {
        Some(re) => re.replace_all(&out, "").into_owned(),
        None => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://site.example/archives/9/";

    fn attrs() -> Vec<String> {
        vec!["data-xkrkllgl".into(), "src".into(), "data-src".into()]
    }

    fn transform<'a>(
        attrs: &'a [String],
        images: &'a HashMap<String, String>,
        videos: &'a [Option<String>],
        cover: Option<&'a str>,
    ) -> ContentTransform<'a> {
        ContentTransform {
            base_url: PAGE,
            image_attrs: attrs,
            images,
            videos,
            cover_key: cover,
        }
    }

    #[test]
    fn test_video_html_mime_and_poster() {
        let html = video_html("videos/202401/05/9/video_0/index.m3u8", Some("videos/c.jpg"));
        assert!(html.starts_with("<video controls=\"controls\" contenteditable=\"false\""));
        assert!(html.contains("data-hls-src=\"videos/202401/05/9/video_0/index.m3u8\""));
        assert!(html.contains("poster=\"videos/c.jpg\""));
        assert!(html.contains("type=\"application/x-mpegURL\""));
        assert!(video_html("v/video.mp4", None).contains("type=\"video/mp4\""));
        assert!(!video_html("v/video.mp4", None).contains("poster"));
    }

    #[test]
    fn test_match_image_fallbacks() {
        let images = HashMap::from([
            ("https://img.example/a.jpg".to_string(), "uploads/a.jpg".to_string()),
            ("https://cdn.example/x/b.png?sig=1".to_string(), "uploads/b.png".to_string()),
        ]);
        assert_eq!(match_image("https://img.example/a.jpg", &images), Some("uploads/a.jpg"));
        assert_eq!(match_image("https://img.example/a.jpg?w=300", &images), Some("uploads/a.jpg"));
        assert_eq!(match_image("https://cdn.example/x/b.png", &images), Some("uploads/b.png"));
        assert_eq!(match_image("https://mirror.example/b.png", &images), None);
        assert_eq!(match_image("https://img.example/c.jpg", &images), None);
    }

    #[test]
    fn test_match_image_ignores_same_file_name_elsewhere() {
        let images = HashMap::from([
            ("https://img.example/b/photo.jpg".to_string(), "uploads/B.jpg".to_string()),
            ("https://img.example/11.jpg".to_string(), "uploads/ELEVEN.jpg".to_string()),
        ]);
        assert_eq!(match_image("https://img.example/a/photo.jpg", &images), None);
        assert_eq!(match_image("https://img.example/1.jpg", &images), None);
    }

    #[test]
    fn test_match_image_ambiguous_query_variants() {
        let images = HashMap::from([
            ("https://img.example/p.jpg?v=1".to_string(), "uploads/p1.jpg".to_string()),
            ("https://img.example/p.jpg?v=2".to_string(), "uploads/p2.jpg".to_string()),
        ]);
        assert_eq!(match_image("https://img.example/p.jpg?v=2", &images), Some("uploads/p2.jpg"));
        assert_eq!(match_image("https://img.example/p.jpg", &images), None);
    }

    #[test]
    fn test_failed_image_keeps_its_own_url() {
        let body = r#"<p><img src="https://img.example/a/photo.jpg"></p><p><img src="https://img.example/b/photo.jpg"></p><p><img src="https://img.example/1.jpg"></p>"#;
        let images = HashMap::from([
            ("https://img.example/b/photo.jpg".to_string(), "uploads/B.jpg".to_string()),
            ("https://img.example/11.jpg".to_string(), "uploads/ELEVEN.jpg".to_string()),
        ]);
        let attrs = attrs();
        let out = transform(&attrs, &images, &[], None).apply(body);

        assert!(out.contains(r#"<img src="https://img.example/a/photo.jpg">"#));
        assert!(out.contains(r#"<img src="https://img.example/1.jpg">"#));
        assert_eq!(out.matches("uploads/B.jpg").count(), 1);
        assert!(!out.contains("uploads/ELEVEN.jpg"));
    }

    #[test]
    fn test_replaces_players_by_slot() {
        let body = r#"<div class="dplayer" data-config="{}"></div><p>mid</p><div class="dplayer"></div><div class="dplayer"></div><video src="https://cdn.example/x.mp4"></video>"#;
        let videos = vec![
            Some("videos/d/9/video_0/index.m3u8".to_string()),
            None,
        ];
        let images = HashMap::new();
        let attrs = attrs();
        let out = transform(&attrs, &images, &videos, Some("videos/d/9/cover.jpg")).apply(body);

        assert_eq!(out.matches("data-hls-src").count(), 1);
        assert!(out.contains("videos/d/9/video_0/index.m3u8"));
        assert!(!out.contains("poster"));
        assert_eq!(out.matches("class=\"dplayer\"").count(), 1);
        assert!(out.contains("https://cdn.example/x.mp4"));
    }

    #[test]
    fn test_single_video_uses_cover_poster() {
        let body = r#"<video src="https://cdn.example/x.m3u8"></video>"#;
        let videos = vec![Some("videos/d/9/video_0/index.m3u8".to_string())];
        let images = HashMap::new();
        let attrs = attrs();
        let out = transform(&attrs, &images, &videos, Some("videos/d/9/cover.jpg")).apply(body);
        assert!(out.contains("poster=\"videos/d/9/cover.jpg\""));
        assert!(out.ends_with(&format!("</video>{SPACER}")));
        assert!(!out.contains("cdn.example"));
    }

    #[test]
    fn test_images_rewritten_and_unresolved_kept() {
        let body = r#"<p><img data-xkrkllgl="https://img.example/a.jpg" src="data:image/gif;base64,R0" alt="a" title="t"></p><p><img data-xkrkllgl="/b.jpg" src="loading.gif"></p>"#;
        let images = HashMap::from([(
            "https://img.example/a.jpg".to_string(),
            "uploads/1_a.jpg".to_string(),
        )]);
        let attrs = attrs();
        let out = transform(&attrs, &images, &[], None).apply(body);

        assert!(out.contains(r#"<img src="uploads/1_a.jpg" draggable="true" style="cursor: grab;">"#));
        assert!(!out.contains("alt="));
        assert!(out.contains(r#"src="https://site.example/b.jpg""#));
        assert!(!out.contains("loading.gif"));
    }

    #[test]
    fn test_normalize_structure() {
        let html = "<p><p>text</p></p><img src=\"u/1.jpg\"><p>  </p><p><img src=\"u/2.jpg\"></p><p><br></p><p><br></p><p>end</p>";
        let out = normalize(html);
        assert_eq!(
            out,
            "<p>text</p><p><img src=\"u/1.jpg\"></p><p><br></p><p><img src=\"u/2.jpg\"></p><p><br></p><p>end</p>"
        );
    }

    #[test]
    fn test_no_media_leaves_text() {
        let attrs = attrs();
        let images = HashMap::new();
        let out = transform(&attrs, &images, &[], None).apply("<p>plain <b>text</b></p>");
        assert_eq!(out, "<p>plain <b>text</b></p>");
    }
}
