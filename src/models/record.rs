// src/models/record.rs

//! Wire records exchanged with the sync backend.

use serde::{Deserialize, Serialize, Serializer};

/// Existence state of one upstream id on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExistsStatus {
    pub exists: bool,
    pub remote_id: Option<u64>,
}

/// Backend answer to an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncResponse {
    pub success: bool,
    pub remote_id: Option<u64>,
    pub is_new: bool,
    pub message: Option<String>,
}

/// Article/video post upsert payload, keyed by `source_id`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncRecord {
    pub source_id: u64,
    pub uid: String,
    pub title: String,
    pub content: String,
    /// Always sent as `null`; the backend derives its own summary
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub has_video: bool,
    pub views_count: Option<u64>,
    pub likes_count: Option<u64>,
    pub comments_count: Option<u64>,
    pub shares_count: Option<u64>,
    pub purchase_count: Option<u64>,
    pub visibility: String,
    pub assigned_role_code: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Zero counters are sent as `null`.
pub fn nonzero(count: u64) -> Option<u64> {
    (count > 0).then_some(count)
}

/// Serial state of an audio novel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialStatus {
    #[default]
    Ongoing,
    Finished,
}

impl SerialStatus {
    /// Interpret a status label such as "连载中" or "已完结".
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some(text) if ["完结", "完本", "已完成"].iter().any(|k| text.contains(k)) => {
                Self::Finished
            }
            Some(text) if text.to_lowercase().contains("finished") => Self::Finished,
            _ => Self::Ongoing,
        }
    }

    /// Integer code understood by the backend.
    pub fn code(self) -> u8 {
        match self {
            Self::Ongoing => 0,
            Self::Finished => 1,
        }
    }
}

impl Serialize for SerialStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Parse a display count like "42K", "1.5M", "3.2W" or "1,024".
///
/// `W` is 10 000. Unparseable text yields 0.
pub fn parse_count(text: Option<&str>) -> u64 {
    let Some(text) = text else { return 0 };
    let clean: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || "KMWkmw".contains(*c))
        .collect();
    let upper = clean.to_ascii_uppercase();
    let multiplier = if upper.contains('W') {
        10_000.0
    } else if upper.contains('M') {
        1_000_000.0
    } else if upper.contains('K') {
        1_000.0
    } else {
        let digits: String = clean
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        return digits.parse().unwrap_or(0);
    };
    let start = clean.find(|c: char| c.is_ascii_digit()).unwrap_or(clean.len());
    leading_float(&clean[start..])
        .map(|v| (v * multiplier).round() as u64)
        .unwrap_or(0)
}

/// Parse a rating like "9.5分" into 0–10; "暂无评分" is 0.
pub fn parse_rating(text: Option<&str>) -> f64 {
    let Some(text) = text else { return 0.0 };
    if text.contains("暂无") || text.contains("无评分") {
        return 0.0;
    }
    let start = text.find(|c: char| c.is_ascii_digit() || c == '.');
    start
        .and_then(|idx| leading_float(&text[idx..]))
        .map(|v| v.clamp(0.0, 10.0))
        .unwrap_or(0.0)
}

fn leading_float(s: &str) -> Option<f64> {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Audio novel upsert payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AudioNovelRecord {
    pub source_id: String,
    pub platform_id: Option<u64>,
    pub title: String,
    pub description: String,
    pub author: String,
    pub cover_image: Option<String>,
    pub category_id: Option<u64>,
    pub category_source_id: Option<String>,
    pub category_name: String,
    pub status: SerialStatus,
    pub read_count: u64,
    pub likes_count: u64,
    pub favorite_count: u64,
    pub average_rating: f64,
    pub chapter_count: usize,
    pub is_active: bool,
}

/// Audio chapter upsert payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AudioChapterRecord {
    pub novel_id: u64,
    pub source_id: String,
    pub title: String,
    pub chapter_num: usize,
    pub audio_url: String,
    pub contents: String,
    pub duration: u32,
    pub is_free: bool,
    pub is_active: bool,
}

/// Raw `{success, ...}` envelope shared by the sync endpoints.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "novel_id", alias = "chapter_id")]
    pub post_id: Option<u64>,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<SyncEnvelope> for SyncResponse {
    fn from(env: SyncEnvelope) -> Self {
        Self {
            success: env.success,
            remote_id: env.post_id,
            is_new: env.is_new,
            message: env.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count_units() {
        assert_eq!(parse_count(Some("42K")), 42_000);
        assert_eq!(parse_count(Some("1.5M")), 1_500_000);
        assert_eq!(parse_count(Some("3.2W")), 32_000);
        assert_eq!(parse_count(Some("收听 999 次")), 999);
        assert_eq!(parse_count(Some("暂无")), 0);
        assert_eq!(parse_count(None), 0);
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating(Some("9.5分")), 9.5);
        assert_eq!(parse_rating(Some("评分 12")), 10.0);
        assert_eq!(parse_rating(Some("暂无评分")), 0.0);
        assert_eq!(parse_rating(None), 0.0);
    }

    #[test]
    fn test_serial_status() {
        assert_eq!(SerialStatus::from_label(Some("已完结")), SerialStatus::Finished);
        assert_eq!(SerialStatus::from_label(Some("更新至第26集")), SerialStatus::Ongoing);
        assert_eq!(SerialStatus::from_label(None).code(), 0);
        assert_eq!(serde_json::to_string(&SerialStatus::Finished).unwrap(), "1");
    }

    #[test]
    fn test_sync_record_serializes_nulls() {
        let record = SyncRecord {
            source_id: 12,
            uid: "7".into(),
            title: "t".into(),
            content: "<p>x</p>".into(),
            description: None,
            cover_image: None,
            has_video: false,
            views_count: nonzero(0),
            likes_count: nonzero(3),
            comments_count: None,
            shares_count: None,
            purchase_count: None,
            visibility: "public".into(),
            assigned_role_code: "jianzhi".into(),
            created_at: None,
            updated_at: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["description"].is_null());
        assert!(json["views_count"].is_null());
        assert_eq!(json["likes_count"], 3);
        assert_eq!(json["source_id"], 12);
    }

    #[test]
    fn test_envelope_into_response() {
        let env: SyncEnvelope =
            serde_json::from_str(r#"{"success":true,"post_id":88,"is_new":true}"#).unwrap();
        let resp: SyncResponse = env.into();
        assert_eq!(resp.remote_id, Some(88));
        assert!(resp.is_new);
    }
}
