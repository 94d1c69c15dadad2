// src/services/extract.rs

//! HTML extraction for list, category and detail pages.
//!
//! Scalar fields are read through an [`Extractor`]: an ordered list of
//! pure strategies over the parsed document where the first hit wins.
//! [`HtmlContentSource`] wires the extractors to a [`PageFetcher`].

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    AudioDetail, ContentConfig, Counters, Episode, ExtractConfig, ItemDetail, RawItem, distinct,
};
use crate::services::source::{Category, ContentSource, ListFilter, PageFetcher, fetch_page};
use crate::utils::url::{
    extract_audio_id, extract_episode_id, extract_source_id, is_manifest_url, is_mp4_url, resolve,
};

static VIEWS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(?:浏览|阅读|views?)").ok());
static LIKES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(?:点赞|喜欢|likes?)").ok());
static COMMENTS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(?:评论|comments?)").ok());

static BANNER_SCRIPT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"loadBannerDirect\(['"]([^'"]+)['"]"#).ok());
static CSS_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"url\(['"]?(.*?)['"]?\)"#).ok());
static LOOSE_DATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d{4}.\d{1,2}.\d{1,2}|\d{4}-\d{2}-\d{2}").ok());

static CV_PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"CV[:：]\s*").ok());
static RATING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"评分[：:]\s*([\d.]+)分?|(\d+\.\d+)分").ok());
static LISTENS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"收听量[：:]\s*(\d+(?:\.\d+)?[KMW]?)",
        r"收听[：:]\s*(\d+(?:\.\d+)?[KMW]?)",
        r"(?i)(\d+(?:\.\d+)?[KMW]?)\s*(?:次)?(?:收听|播放)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});
static FAVORITES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"收藏[：:]\s*(\d+(?:\.\d+)?[KMW]?)").ok());
static DISPLAY_COUNT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?[KMW]?)").ok());

/// Cover fallbacks on list entries.
const LIST_COVER_ATTRS: [&str; 5] = ["src", "data-src", "data-lazy", "data-original", "data-url"];
const LIST_BACKGROUND: &str = ".post-thumbnail, .entry-thumbnail, .thumbnail, .cover, .featured-image, .post-card, .blog-background";
const LIST_DATE: &str = "time, .date, .post-date, .entry-date, .meta-date";
const POST_INFO: &str = ".post-card-info, .post-info";
const SUB_MENU: &str = "ul, .sub-menu, .dropdown-menu";

/// Audio detail page layout.
mod audio_layout {
    pub const TITLE: [&str; 4] = ["h1.title", "h1", ".audio-title", ".detail-title"];
    pub const COVER: &str = "img.cover, .audio-cover img, .detail-cover img";
    pub const DESCRIPTION: &str = ".description, .intro, .summary";
    pub const AUTHOR: &str = ".cv, .author, .voice-actor";
    pub const AUTHOR_LINK: &str = "a[href*='/cv/']";
    pub const CATEGORY: &str = ".category, .genre";
    pub const LIKES: &str = ".like-count, .likes, [class*='like']";
    pub const FAVORITES: &str = ".collect-count, .collects, [class*='collect']";
    pub const RATING_STARS: &str = ".rating [class*='star']";
    pub const EPISODES: [&str; 5] = [
        ".episode-list .episode-item",
        ".chapter-list .chapter-item",
        ".chapter-item",
        "[class*='episode'] a",
        "[class*='chapter'] a",
    ];
    pub const AUDIO_SRC: &str = "audio[src], audio source[src], source[src]";
    pub const AUDIO_DATA_SRC: &str = "[data-src*='mp3'], [data-src*='m4a'], [data-src*='audio']";
}

/// Parse a CSS selector, mapping failures to a selector error.
pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::selector(selector, format!("{e:?}")))
}

fn parse_all(selectors: &[String]) -> Result<Vec<Selector>> {
    selectors.iter().map(|s| parse_selector(s)).collect()
}

/// Collapse runs of whitespace and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

type Strategy<T> = Box<dyn Fn(&Html) -> Option<T> + Send + Sync>;

/// Ordered chain of extraction strategies; the first `Some` wins.
pub struct Extractor<T> {
    name: &'static str,
    strategies: Vec<Strategy<T>>,
}

impl<T> Extractor<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            strategies: Vec::new(),
        }
    }

    /// Append a strategy to the end of the chain.
    pub fn with(mut self, strategy: impl Fn(&Html) -> Option<T> + Send + Sync + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn extract(&self, document: &Html) -> Option<T> {
        let found = self.strategies.iter().find_map(|strategy| strategy(document));
        if found.is_none() {
            log::debug!("No strategy matched for {}", self.name);
        }
        found
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Extractor<String> {
    /// One strategy per selector reading the first match's text.
    pub fn texts(name: &'static str, selectors: Vec<Selector>) -> Self {
        selectors.into_iter().fold(Self::new(name), |chain, selector| {
            chain.with(move |doc| doc.select(&selector).map(element_text).find(|t| !t.is_empty()))
        })
    }
}

/// Whether an image URL is a lazy-load placeholder or inline data.
pub fn is_placeholder(url: &str, keywords: &[String]) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("data:") || keywords.iter().any(|k| lower.contains(&k.to_ascii_lowercase()))
}

/// Normalize a timestamp to `YYYY-MM-DD HH:MM:SS` (UTC for zoned input).
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).format(FORMAT).to_string());
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Some(dt.format(FORMAT).to_string());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(FORMAT).to_string())
}

/// URL of page `page` of a category listing. Page 1 is the category URL.
pub fn page_url(category_url: &str, page: u32) -> String {
    if page <= 1 {
        return category_url.to_string();
    }
    if category_url.contains('?') {
        format!("{category_url}&page={page}")
    } else if category_url.ends_with('/') {
        format!("{category_url}{page}/")
    } else {
        format!("{category_url}/{page}/")
    }
}

/// Keep only the body after the lead-in quote and up to the last player.
fn trim_body(html: &str) -> &str {
    const QUOTE_END: &str = "</blockquote>";
    const VIDEO_END: &str = "</video>";
    let mut body = match html.find(QUOTE_END) {
        Some(pos) if pos > 0 => &html[pos + QUOTE_END.len()..],
        _ => html,
    };
    if let Some(pos) = body.rfind(VIDEO_END) {
        body = &body[..pos + VIDEO_END.len()];
    } else if let Some(start) = body.rfind("class=\"dplayer") {
        if let Some(end) = body[start..].find("</div>") {
            body = &body[..start + end + "</div>".len()];
        }
    }
    body
}

fn capture_u64(re: &LazyLock<Option<Regex>>, text: &str) -> Option<u64> {
    re.as_ref()?.captures(text)?.get(1)?.as_str().parse().ok()
}

fn capture_str(re: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    Some(re.as_ref()?.captures(text)?.get(1)?.as_str().to_string())
}

/// Video URL from a DPlayer `data-config` JSON blob.
fn dplayer_video_url(config: &str) -> Option<String> {
    let config = config.replace("&quot;", "\"").replace("&amp;", "&");
    let value: Value = serde_json::from_str(&config).ok()?;
    value["video"]["url"].as_str().map(str::to_string)
}

/// Extractors and selectors for article detail pages.
pub struct DetailExtractors {
    title: Extractor<String>,
    cover: Extractor<String>,
    published: Extractor<String>,
    counters: Extractor<Counters>,
    body: Vec<Selector>,
    videos: Vec<Selector>,
    post_info: Selector,
    span: Selector,
    image_attrs: Vec<String>,
    placeholders: Vec<String>,
}

impl DetailExtractors {
    pub fn from_config(extract: &ExtractConfig, content: &ContentConfig) -> Result<Self> {
        let placeholders = extract.placeholder_keywords.clone();

        let cover = parse_all(&extract.cover_selectors)?.into_iter().fold(
            Extractor::new("cover"),
            |chain, selector| {
                let placeholders = placeholders.clone();
                chain.with(move |doc| {
                    let el = doc.select(&selector).next()?;
                    let url = if el.value().name() == "meta" {
                        el.value().attr("content")
                    } else {
                        ["src", "data-src", "data-xkrkllgl"]
                            .iter()
                            .find_map(|a| el.value().attr(a))
                    }?;
                    let url = url.trim();
                    (!url.is_empty() && !is_placeholder(url, &placeholders))
                        .then(|| url.to_string())
                })
            },
        );

        let published = parse_all(&extract.published_selectors)?.into_iter().fold(
            Extractor::new("published"),
            |chain, selector| {
                chain.with(move |doc| {
                    let el = doc.select(&selector).next()?;
                    let attr = el
                        .value()
                        .attr("content")
                        .or_else(|| el.value().attr("datetime"));
                    attr.and_then(normalize_timestamp)
                        .or_else(|| non_empty(element_text(el)))
                })
            },
        );

        let counters = parse_all(&extract.stats_selectors)?.into_iter().fold(
            Extractor::new("counters"),
            |chain, selector| {
                chain.with(move |doc| {
                    let text = element_text(doc.select(&selector).next()?);
                    Some(Counters {
                        views: capture_u64(&VIEWS, &text).unwrap_or(0),
                        likes: capture_u64(&LIKES, &text).unwrap_or(0),
                        comments: capture_u64(&COMMENTS, &text).unwrap_or(0),
                        ..Counters::default()
                    })
                })
            },
        );

        Ok(Self {
            title: Extractor::texts("title", parse_all(&extract.title_selectors)?),
            cover,
            published,
            counters,
            body: parse_all(&extract.body_selectors)?,
            videos: parse_all(&extract.video_selectors)?,
            post_info: parse_selector(POST_INFO)?,
            span: parse_selector("span")?,
            image_attrs: content.image_attrs.clone(),
            placeholders,
        })
    }

    /// Parse an article detail page fetched from `page_url`.
    pub fn parse(&self, html: &str, page_url: &str) -> ItemDetail {
        let document = Html::parse_document(html);
        let body_el = self
            .body
            .iter()
            .find_map(|selector| document.select(selector).next());

        let mut detail = ItemDetail {
            source_id: extract_source_id(page_url),
            title: self.title.extract(&document).unwrap_or_default(),
            cover_url: self.cover.extract(&document).map(|u| resolve(page_url, &u)),
            published_at: self.published.extract(&document),
            counters: self.counters.extract(&document).unwrap_or_default(),
            categories: self.categories(&document),
            ..ItemDetail::default()
        };

        if let Some(body) = body_el {
            detail.body_html = trim_body(&body.inner_html()).trim().to_string();
            detail.image_urls = self.images(body, page_url);
            detail.video_urls = self.videos(body, page_url);
        }
        detail.normalize_media();
        detail
    }

    fn categories(&self, document: &Html) -> Vec<String> {
        let Some(info) = document.select(&self.post_info).next() else {
            return Vec::new();
        };
        let names = info
            .select(&self.span)
            .filter(|span| {
                !matches!(
                    span.value().attr("itemprop"),
                    Some("datePublished") | Some("author")
                )
            })
            .map(element_text)
            .filter(|text| text.contains(',') && (3..100).contains(&text.chars().count()))
            .flat_map(|text| {
                text.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| (2..=20).contains(&c.chars().count()))
                    .collect::<Vec<_>>()
            })
            .collect();
        distinct(names)
    }

    /// Image URLs from the first configured attribute that yields any.
    fn images(&self, body: ElementRef<'_>, page_url: &str) -> Vec<String> {
        for attr in &self.image_attrs {
            let Ok(selector) = parse_selector(&format!("img[{attr}]")) else {
                continue;
            };
            let urls: Vec<String> = body
                .select(&selector)
                .filter_map(|img| img.value().attr(attr))
                .map(str::trim)
                .filter(|src| !src.is_empty() && !is_placeholder(src, &self.placeholders))
                .map(|src| resolve(page_url, src))
                .collect();
            if !urls.is_empty() {
                return distinct(urls);
            }
        }
        Vec::new()
    }

    /// Video URLs; manifests win over MP4 files when both are present.
    fn videos(&self, body: ElementRef<'_>, page_url: &str) -> Vec<String> {
        let mut manifests = Vec::new();
        let mut mp4s = Vec::new();
        for selector in &self.videos {
            for el in body.select(selector) {
                let url = match el.value().attr("data-config") {
                    Some(config) => dplayer_video_url(config),
                    None => el
                        .value()
                        .attr("src")
                        .or_else(|| el.value().attr("data-src"))
                        .map(str::to_string),
                };
                let Some(url) = url else { continue };
                if is_manifest_url(&url) {
                    manifests.push(resolve(page_url, &url));
                } else if is_mp4_url(&url) {
                    mp4s.push(resolve(page_url, &url));
                }
            }
        }
        if manifests.is_empty() {
            distinct(mp4s)
        } else {
            distinct(manifests)
        }
    }
}

/// Parse an audio-novel detail page fetched from `page_url`.
pub fn parse_audio_detail(html: &str, page_url: &str) -> Result<ItemDetail> {
    let document = Html::parse_document(html);
    let first_text = |selector: &str| -> Result<Option<String>> {
        let selector = parse_selector(selector)?;
        Ok(document
            .select(&selector)
            .map(element_text)
            .find(|t| !t.is_empty()))
    };
    let body_text = clean_text(&document.root_element().text().collect::<String>());

    let mut title = None;
    for selector in audio_layout::TITLE {
        if let Some(text) = first_text(selector)? {
            title = Some(text);
            break;
        }
    }

    let cover_sel = parse_selector(audio_layout::COVER)?;
    let cover_url = document
        .select(&cover_sel)
        .find_map(|img| img.value().attr("src"))
        .filter(|src| !src.trim().is_empty())
        .map(|src| resolve(page_url, src.trim()));

    let author = match first_text(audio_layout::AUTHOR)? {
        Some(text) => CV_PREFIX
            .as_ref()
            .map(|re| re.replace(&text, "").trim().to_string())
            .or(Some(text)),
        None => first_text(audio_layout::AUTHOR_LINK)?,
    };

    let status_text = if body_text.contains("完结") {
        "完结"
    } else if body_text.contains("连载") || body_text.contains("更新中") {
        "连载"
    } else {
        "完结"
    };

    let rating_text = RATING
        .as_ref()
        .and_then(|re| re.captures(&body_text))
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            let stars = parse_selector(audio_layout::RATING_STARS).ok()?;
            let count = document.select(&stars).count();
            (count > 0).then(|| count.to_string())
        });

    let listens_text = LISTENS.iter().find_map(|re| {
        Some(re.captures(&body_text)?.get(1)?.as_str().to_string())
    });
    let likes_text = first_text(audio_layout::LIKES)?
        .and_then(|text| capture_str(&DISPLAY_COUNT, &text));
    let favorites_text = match capture_str(&FAVORITES, &body_text) {
        Some(count) => Some(count),
        None => first_text(audio_layout::FAVORITES)?
            .and_then(|text| capture_str(&DISPLAY_COUNT, &text)),
    };

    let mut episodes = Vec::new();
    for selector in audio_layout::EPISODES {
        let selector = parse_selector(selector)?;
        episodes = document
            .select(&selector)
            .filter_map(|el| {
                let title = element_text(el);
                let href = el.value().attr("href")?;
                if title.is_empty() {
                    return None;
                }
                let url = resolve(page_url, href);
                Some(Episode {
                    id: extract_episode_id(&url),
                    title,
                    url,
                    duration: None,
                    is_free: true,
                })
            })
            .collect();
        if !episodes.is_empty() {
            break;
        }
    }

    let src_sel = parse_selector(audio_layout::AUDIO_SRC)?;
    let data_sel = parse_selector(audio_layout::AUDIO_DATA_SRC)?;
    let audio_urls = distinct(
        document
            .select(&src_sel)
            .filter_map(|el| el.value().attr("src"))
            .chain(
                document
                    .select(&data_sel)
                    .filter_map(|el| el.value().attr("data-src")),
            )
            .map(|src| resolve(page_url, src.trim()))
            .collect(),
    );

    Ok(ItemDetail {
        source_id: extract_audio_id(page_url),
        title: title.unwrap_or_default(),
        cover_url,
        audio: Some(AudioDetail {
            author,
            description: first_text(audio_layout::DESCRIPTION)?,
            category: first_text(audio_layout::CATEGORY)?,
            status_text: Some(status_text.to_string()),
            rating_text,
            listens_text,
            likes_text,
            favorites_text,
            episodes,
            audio_urls,
            ..AudioDetail::default()
        }),
        ..ItemDetail::default()
    })
}

/// Which kind of site a source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Article,
    Audio,
}

/// Generic selector-driven source for article and audio sites.
pub struct HtmlContentSource {
    pages: Arc<dyn PageFetcher>,
    kind: SourceKind,
    site_base: Option<String>,
    detail: DetailExtractors,
    nav: Vec<Selector>,
    sub_menu: Selector,
    list_items: Vec<Selector>,
    list_title: Selector,
    anchor: Selector,
    image: Selector,
    script: Selector,
    background: Selector,
    date: Selector,
    meta: Selector,
    audio: Selector,
    exclude: Vec<String>,
}

impl HtmlContentSource {
    pub fn new(
        pages: Arc<dyn PageFetcher>,
        kind: SourceKind,
        extract: &ExtractConfig,
        content: &ContentConfig,
    ) -> Result<Self> {
        Ok(Self {
            pages,
            kind,
            site_base: content.site_base_url.clone(),
            detail: DetailExtractors::from_config(extract, content)?,
            nav: parse_all(&extract.nav_selectors)?,
            sub_menu: parse_selector(SUB_MENU)?,
            list_items: parse_all(&extract.list_item_selectors)?,
            list_title: parse_selector(&extract.list_title_selector)?,
            anchor: parse_selector("a")?,
            image: parse_selector("img")?,
            script: parse_selector("script")?,
            background: parse_selector(LIST_BACKGROUND)?,
            date: parse_selector(LIST_DATE)?,
            meta: parse_selector(".meta, .post-meta")?,
            audio: parse_selector("audio[src], audio source[src]")?,
            exclude: extract.exclude_categories.clone(),
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    fn item_source_id(&self, url: &str) -> Option<u64> {
        match self.kind {
            SourceKind::Article => extract_source_id(url),
            SourceKind::Audio => extract_audio_id(url),
        }
    }

    /// Parse the navigation menu of a home page.
    pub fn parse_categories(&self, html: &str, page_url: &str) -> Vec<Category> {
        let document = Html::parse_document(html);
        let Some(nav) = self
            .nav
            .iter()
            .find_map(|selector| document.select(selector).next())
        else {
            log::warn!("No navigation menu found on {}", page_url);
            return Vec::new();
        };

        let mut categories = Vec::new();
        for (i, li) in child_elements(nav, "li").enumerate() {
            let Some(link) = child_elements(li, "a")
                .next()
                .or_else(|| child_elements(li, "button").next())
            else {
                continue;
            };
            let name = element_text(link);
            if name.is_empty() || self.exclude.contains(&name) {
                continue;
            }
            let url = link
                .value()
                .attr("href")
                .map(|href| resolve(page_url, href))
                .unwrap_or_default();

            let children = li
                .select(&self.sub_menu)
                .next()
                .map(|sub| {
                    child_elements(sub, "li")
                        .enumerate()
                        .filter_map(|(j, sub_li)| {
                            let a = sub_li.select(&self.anchor).next()?;
                            let name = element_text(a);
                            let href = a.value().attr("href")?;
                            (!name.is_empty() && !self.exclude.contains(&name)).then(|| Category {
                                id: format!("category-{i}-{j}"),
                                name,
                                url: resolve(page_url, href),
                                children: Vec::new(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            categories.push(Category {
                id: format!("category-{i}"),
                name,
                url,
                children,
            });
        }
        categories
    }

    /// Parse the entries of a list page fetched from `page_url`.
    pub fn parse_list(&self, html: &str, page_url: &str) -> Vec<RawItem> {
        let document = Html::parse_document(html);
        let Some(entries) = self.list_items.iter().find_map(|selector| {
            let found: Vec<ElementRef<'_>> = document.select(selector).collect();
            (!found.is_empty()).then_some(found)
        }) else {
            log::info!("No list entries found on {}", page_url);
            return Vec::new();
        };

        entries
            .into_iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let title_el = entry.select(&self.list_title).next();
                let title = title_el.map(element_text).unwrap_or_default();
                let href = title_el
                    .and_then(|t| t.select(&self.anchor).next())
                    .or_else(|| entry.select(&self.anchor).next())
                    .and_then(|a| a.value().attr("href"))?;
                if title.is_empty() || href.trim().is_empty() {
                    return None;
                }
                let url = resolve(page_url, href.trim());
                let source_id = self.item_source_id(&url);
                Some(RawItem {
                    id: match source_id {
                        Some(id) => format!("item-{id}"),
                        None => format!("item-{i}"),
                    },
                    source_id,
                    title,
                    cover_url: self.list_cover(entry).map(|c| resolve(page_url, &c)),
                    published_at: self.list_date(entry),
                    url,
                    ..RawItem::default()
                })
            })
            .collect()
    }

    fn list_cover(&self, entry: ElementRef<'_>) -> Option<String> {
        let script: String = entry.select(&self.script).flat_map(|s| s.text()).collect();
        if let Some(cover) = capture_str(&BANNER_SCRIPT, &script) {
            return Some(cover);
        }
        if let Some(img) = entry.select(&self.image).next() {
            if let Some(src) = LIST_COVER_ATTRS
                .iter()
                .find_map(|a| img.value().attr(a).filter(|v| !v.trim().is_empty()))
            {
                return Some(src.trim().to_string());
            }
        }
        let style = entry.select(&self.background).next()?.value().attr("style")?;
        capture_str(&CSS_URL, style).filter(|u| !u.is_empty())
    }

    fn list_date(&self, entry: ElementRef<'_>) -> Option<String> {
        if let Some(el) = entry.select(&self.date).next() {
            let text = element_text(el);
            if !text.is_empty() {
                return Some(text);
            }
            if let Some(dt) = el.value().attr("datetime") {
                return Some(dt.trim().to_string());
            }
        }
        let meta: String = entry.select(&self.meta).map(element_text).collect();
        LOOSE_DATE
            .as_ref()?
            .find(&meta)
            .map(|m| m.as_str().to_string())
    }

    /// First playable audio source on an episode page.
    pub fn parse_episode_audio(&self, html: &str, page_url: &str) -> Option<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.audio)
            .find_map(|el| el.value().attr("src"))
            .map(|src| resolve(page_url, src.trim()))
    }
}

/// Direct element children named `name`.
fn child_elements<'a>(
    parent: ElementRef<'a>,
    name: &'static str,
) -> impl Iterator<Item = ElementRef<'a>> {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |el| el.value().name() == name)
}

#[async_trait]
impl ContentSource for HtmlContentSource {
    async fn fetch_detail(&self, url: &str) -> Result<ItemDetail> {
        let html = fetch_page(self.pages.as_ref(), url).await?;
        match self.kind {
            SourceKind::Article => Ok(self.detail.parse(&html, url)),
            SourceKind::Audio => parse_audio_detail(&html, url),
        }
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let base = self
            .site_base
            .clone()
            .ok_or_else(|| AppError::config("content.site_base_url is required to list categories"))?;
        let html = fetch_page(self.pages.as_ref(), &base).await?;
        let categories = self.parse_categories(&html, &base);
        log::info!("Parsed {} categories from {}", categories.len(), base);
        Ok(categories)
    }

    async fn list_page(
        &self,
        category: &Category,
        page: u32,
        filter: &ListFilter,
    ) -> Result<Vec<RawItem>> {
        let url = page_url(&category.url, page);
        let html = fetch_page(self.pages.as_ref(), &url).await?;
        let mut items = self.parse_list(&html, &url);
        for item in &mut items {
            item.category = Some(category.name.clone());
        }
        Ok(filter.apply(items))
    }

    async fn resolve_audio_url(&self, episode_url: &str) -> Result<Option<String>> {
        let html = fetch_page(self.pages.as_ref(), episode_url).await?;
        Ok(self.parse_episode_audio(&html, episode_url))
    }
}
