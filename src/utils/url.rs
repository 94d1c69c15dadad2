// src/utils/url.rs

//! URL manipulation and id extraction utilities.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Article URL shapes that carry the upstream numeric id, tried in order.
static SOURCE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/archives/(\d+)",
        r"/post/(\d+)",
        r"/article/(\d+)",
        r"/\d+/(\d+)",
        r"[?&]id=(\d+)",
        r"[?&]post_id=(\d+)",
        r"[?&]article_id=(\d+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static AUDIO_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"/audio/intro\?(?:.*&)?id=(\d+)", r"/audio/(\d+)(?:[/?#]|$)"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

static EPISODE_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/audio/(\d+)\.mp3").ok());

static LOCAL_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^item-(\d+)$").ok());

/// Resolve a potentially relative URL against a base URL string.
///
/// Unparseable bases leave `href` untouched.
pub fn resolve(base: &str, href: &str) -> String {
    match Url::parse(base) {
        Ok(base) => super::resolve_url(&base, href),
        Err(_) => href.to_string(),
    }
}

/// Everything up to and including the last `/` of a URL's path.
pub fn directory_of(url: &str) -> &str {
    let path_end = url.find(['?', '#']).unwrap_or(url.len());
    match url[..path_end].rfind('/') {
        Some(idx) => &url[..=idx],
        None => "",
    }
}

/// Final path segment of a URL or key, without query or fragment.
pub fn basename(path: &str) -> &str {
    let path = strip_query(path);
    path.rsplit('/').next().unwrap_or(path)
}

/// Drop `?query` and `#fragment`.
pub fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Lowercased extension of the final path segment, if any.
pub fn file_extension(url: &str) -> Option<String> {
    let name = basename(url);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Image extension used for relayed object keys.
///
/// Only jpg/png/gif/webp survive; `jpeg` becomes `jpg` and anything else
/// falls back to `jpg`.
pub fn image_extension(url: &str) -> &'static str {
    match file_extension(url).as_deref() {
        Some("png") => "png",
        Some("gif") => "gif",
        Some("webp") => "webp",
        _ => "jpg",
    }
}

/// Whether a media URL points at an HLS manifest.
pub fn is_manifest_url(url: &str) -> bool {
    strip_query(url).to_ascii_lowercase().contains(".m3u8")
}

/// Whether a media URL points at a progressive MP4 file.
pub fn is_mp4_url(url: &str) -> bool {
    strip_query(url).to_ascii_lowercase().contains(".mp4")
}

/// Whether a URL points straight at an audio file.
pub fn is_audio_url(url: &str) -> bool {
    let path = strip_query(url).to_ascii_lowercase();
    [".mp3", ".m4a", ".aac"].iter().any(|ext| path.ends_with(ext))
}

/// Extract the upstream numeric article id from a URL.
pub fn extract_source_id(url: &str) -> Option<u64> {
    capture_id(&SOURCE_ID_PATTERNS, url)
}

/// Extract the audio-novel id from `/audio/intro?id=N` or `/audio/N`.
pub fn extract_audio_id(url: &str) -> Option<u64> {
    capture_id(&AUDIO_ID_PATTERNS, url)
}

/// Extract an episode id from a `/audio/N.mp3` URL.
pub fn extract_episode_id(url: &str) -> Option<u64> {
    let re = EPISODE_ID_PATTERN.as_ref()?;
    re.captures(url)?.get(1)?.as_str().parse().ok()
}

/// Parse the numeric part of a synthetic local item id (`item-N`).
pub fn parse_local_id(id: &str) -> Option<u64> {
    let re = LOCAL_ID_PATTERN.as_ref()?;
    re.captures(id)?.get(1)?.as_str().parse().ok()
}

fn capture_id(patterns: &[Regex], url: &str) -> Option<u64> {
    patterns.iter().find_map(|re| {
        re.captures(url)?
            .get(1)?
            .as_str()
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_source_id_patterns() {
        assert_eq!(
            extract_source_id("https://site.example/archives/12345"),
            Some(12345)
        );
        assert_eq!(extract_source_id("https://site.example/post/77/"), Some(77));
        assert_eq!(
            extract_source_id("https://site.example/2024/991.html"),
            Some(991)
        );
        assert_eq!(
            extract_source_id("https://site.example/view.php?cat=2&post_id=55"),
            Some(55)
        );
        assert_eq!(extract_source_id("https://site.example/about"), None);
        assert_eq!(extract_source_id("https://site.example/post/0"), None);
    }

    #[test]
    fn test_extract_audio_id() {
        assert_eq!(
            extract_audio_id("https://audio.example/audio/intro?id=3021"),
            Some(3021)
        );
        assert_eq!(extract_audio_id("https://audio.example/audio/88"), Some(88));
        assert_eq!(extract_audio_id("https://audio.example/audio/88.mp3"), None);
        assert_eq!(
            extract_episode_id("https://cdn.example/audio/4410.mp3?sign=x"),
            Some(4410)
        );
    }

    #[test]
    fn test_parse_local_id() {
        assert_eq!(parse_local_id("item-42"), Some(42));
        assert_eq!(parse_local_id("item-x"), None);
        assert_eq!(parse_local_id("42"), None);
    }

    #[test]
    fn test_directory_and_basename() {
        let url = "https://cdn.example/hls/abc/index.m3u8?token=1";
        assert_eq!(directory_of(url), "https://cdn.example/hls/abc/");
        assert_eq!(basename(url), "index.m3u8");
        assert_eq!(basename("videos/202401/05/9/video_0/segment_003.ts"), "segment_003.ts");
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension("https://x.example/a/b.JPEG"), "jpg");
        assert_eq!(image_extension("https://x.example/a/b.png?w=200"), "png");
        assert_eq!(image_extension("https://x.example/a/b.bmp"), "jpg");
        assert_eq!(image_extension("https://x.example/a/noext"), "jpg");
    }

    #[test]
    fn test_media_kind() {
        assert!(is_manifest_url("https://x.example/v/index.m3u8?k=1"));
        assert!(is_mp4_url("https://x.example/v/clip.MP4"));
        assert!(!is_manifest_url("https://x.example/v/clip.mp4"));
        assert!(is_audio_url("https://cdn.example/audio/4410.mp3?sign=x"));
        assert!(!is_audio_url("https://audio.example/audio/play?id=4410"));
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve("https://x.example/hls/a/index.m3u8", "seg1.ts"),
            "https://x.example/hls/a/seg1.ts"
        );
        assert_eq!(resolve("::bad", "seg1.ts"), "seg1.ts");
    }
}
