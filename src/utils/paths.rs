// src/utils/paths.rs

//! Object key builders for relayed media.
//!
//! ```text
//! videos/{YYYYMM}/{DD}/{source_id}/cover.jpg
//! videos/{YYYYMM}/{DD}/{source_id}/video_{n}/segment_{i:03}.ts
//! videos/{YYYYMM}/{DD}/{source_id}/video_{n}/index.m3u8
//! uploads/{ts}_{rand8}_{ts2}_{rand9}.{ext}
//! audio-novels/{YYYYMM}/{DD}/{audio_id}/chapter_{n:03}.mp3
//! ```

use chrono::{DateTime, Local, TimeZone};
use rand::Rng;
use rand::distr::Alphanumeric;

pub const VIDEO_ROOT: &str = "videos";
pub const AUDIO_ROOT: &str = "audio-novels";
pub const UPLOAD_ROOT: &str = "uploads";

/// `YYYYMM/DD` for a point in time.
pub fn date_prefix<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y%m/%d").to_string()
}

/// Date prefix for the current local day.
pub fn today_prefix() -> String {
    date_prefix(&Local::now())
}

/// Directory holding every relayed file of one video item.
pub fn video_dir(date_prefix: &str, source_id: u64) -> String {
    format!("{VIDEO_ROOT}/{date_prefix}/{source_id}")
}

pub fn cover_key(date_prefix: &str, source_id: u64) -> String {
    format!("{}/cover.jpg", video_dir(date_prefix, source_id))
}

/// Sub directory for the n-th video of an item.
pub fn video_subdir(index: usize) -> String {
    format!("video_{index}")
}

pub fn segment_key(manifest_dir: &str, index: usize) -> String {
    format!("{manifest_dir}/segment_{index:03}.ts")
}

pub fn manifest_key(manifest_dir: &str) -> String {
    format!("{manifest_dir}/index.m3u8")
}

/// Key file name; the first key of a playlist is `ts.key`.
pub fn key_file_name(index: usize) -> String {
    if index == 0 {
        "ts.key".to_string()
    } else {
        format!("ts_{index}.key")
    }
}

pub fn key_file_key(manifest_dir: &str, index: usize) -> String {
    format!("{manifest_dir}/{}", key_file_name(index))
}

/// Directory for an audio novel's cover and chapters.
pub fn audio_dir(date_prefix: &str, audio_id: u64) -> String {
    format!("{AUDIO_ROOT}/{date_prefix}/{audio_id}")
}

pub fn audio_cover_key(date_prefix: &str, audio_id: u64, ext: &str) -> String {
    format!("{}/cover.{ext}", audio_dir(date_prefix, audio_id))
}

/// Chapter numbers are 1-based.
pub fn chapter_key(date_prefix: &str, audio_id: u64, chapter_num: usize) -> String {
    format!(
        "{}/chapter_{chapter_num:03}.mp3",
        audio_dir(date_prefix, audio_id)
    )
}

/// Collision-resistant key for an uploaded inline image.
pub fn image_upload_key(ext: &str) -> String {
    let mut rng = rand::rng();
    let ts = chrono::Utc::now().timestamp_millis();
    let ts2 = ts - rng.random_range(0..10_000i64);
    let rand8 = random_token(&mut rng, 8);
    let rand9 = random_token(&mut rng, 9);
    format!("{UPLOAD_ROOT}/{ts}_{rand8}_{ts2}_{rand9}.{ext}")
}

fn random_token(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
