// src/pipeline/audio.rs

//! Audio novel pipeline.
//!
//! A novel is upserted first, then each episode is relayed as an MP3 and
//! upserted as a chapter of it. Single chapter failures are counted and
//! reported in the result message; they do not fail the task.

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{
    AudioChapterRecord, AudioDetail, AudioNovelRecord, Episode, ItemDetail, SerialStatus,
    TaskResult, parse_count, parse_rating,
};
use crate::pipeline::task::{ItemPipeline, RecordKind, SyncTask, TaskContext};
use crate::services::relay::no_progress;
use crate::storage::content_types;
use crate::utils::paths;
use crate::utils::truncate_chars;
use crate::utils::url::{extract_audio_id, extract_episode_id, image_extension, is_audio_url};

const DESCRIPTION_MAX: usize = 1000;
const DEFAULT_CATEGORY: &str = "全部有声";
const CATEGORY_SOURCE_PREFIX: &str = "uaa_";
const CHAPTERS_START: u8 = 30;
const CHAPTERS_SPAN: u8 = 65;

/// Episodes listed on the detail page, or ones synthesized from loose
/// audio URLs when the page lists none.
pub fn episodes_of(title: &str, audio: &AudioDetail) -> Vec<Episode> {
    if !audio.episodes.is_empty() {
        return audio.episodes.clone();
    }
    audio
        .audio_urls
        .iter()
        .enumerate()
        .map(|(i, url)| Episode {
            id: extract_episode_id(url),
            title: if i == 0 {
                title.to_string()
            } else {
                format!("{} - 第{}集", title, i + 1)
            },
            url: url.clone(),
            duration: None,
            is_free: true,
        })
        .collect()
}

/// Novel record from a fetched detail. Titles keep at most `title_max`
/// characters.
pub fn novel_record(
    audio_id: u64,
    detail: &ItemDetail,
    audio: &AudioDetail,
    category: &str,
    cover_key: Option<String>,
    chapter_count: usize,
    title_max: usize,
) -> AudioNovelRecord {
    let title = detail.title.trim();
    let author = audio
        .narrator
        .as_deref()
        .or(audio.author.as_deref())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or("未知");
    AudioNovelRecord {
        source_id: audio_id.to_string(),
        platform_id: None,
        title: if title.is_empty() {
            "未知标题".into()
        } else {
            truncate_chars(title, title_max)
        },
        description: truncate_chars(
            audio.description.as_deref().unwrap_or_default().trim(),
            DESCRIPTION_MAX,
        ),
        author: author.to_string(),
        cover_image: cover_key,
        category_id: None,
        category_source_id: Some(format!("{CATEGORY_SOURCE_PREFIX}{category}")),
        category_name: category.to_string(),
        status: SerialStatus::from_label(audio.status_text.as_deref()),
        read_count: parse_count(audio.listens_text.as_deref()),
        likes_count: parse_count(audio.likes_text.as_deref()),
        favorite_count: parse_count(audio.favorites_text.as_deref()),
        average_rating: parse_rating(audio.rating_text.as_deref()),
        chapter_count,
        is_active: true,
    }
}

/// Chapter record for the `chapter_num`-th (1-based) episode.
pub fn chapter_record(
    novel_id: u64,
    audio_id: u64,
    chapter_num: usize,
    episode: &Episode,
    audio_key: String,
    title_max: usize,
) -> AudioChapterRecord {
    let title = episode.title.trim();
    AudioChapterRecord {
        novel_id,
        source_id: episode
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("{audio_id}_{chapter_num}")),
        title: if title.is_empty() {
            format!("第{chapter_num}章")
        } else {
            truncate_chars(title, title_max)
        },
        chapter_num,
        audio_url: audio_key,
        contents: String::new(),
        duration: episode.duration.unwrap_or(0),
        is_free: episode.is_free,
        is_active: true,
    }
}

pub struct AudioPipeline {
    ctx: TaskContext,
}

impl AudioPipeline {
    pub fn new(ctx: TaskContext) -> Self {
        Self { ctx }
    }

    /// Playable URL for an episode: the episode URL itself when it is an
    /// audio file, otherwise whatever the source finds on the episode page.
    async fn audio_url(&self, episode: &Episode) -> Result<String> {
        if is_audio_url(&episode.url) {
            return Ok(episode.url.clone());
        }
        self.ctx
            .source
            .resolve_audio_url(&episode.url)
            .await?
            .ok_or_else(|| AppError::fetch(&episode.url, "no audio on episode page"))
    }

    async fn upload_cover(&self, url: &str, date_prefix: &str, audio_id: u64) -> Option<String> {
        let ext = image_extension(url);
        let key = paths::audio_cover_key(date_prefix, audio_id, ext);
        let bytes = match self.ctx.relay.downloader().get_bytes(url).await {
            Ok(bytes) if !bytes.is_empty() => self.ctx.decryptor.decrypt_image(bytes),
            Ok(_) => {
                log::warn!("Empty cover body from {}", url);
                return None;
            }
            Err(e) => {
                log::warn!("Audio cover download failed for {}: {}", url, e);
                return None;
            }
        };
        match self
            .ctx
            .relay
            .store()
            .upload(bytes, &key, &content_types::for_image_ext(ext))
            .await
        {
            Ok(outcome) => Some(outcome.resource_key),
            Err(e) => {
                log::warn!("Audio cover upload failed for {}: {}", url, e);
                None
            }
        }
    }

    /// Relay one chapter and upsert it.
    async fn sync_chapter(
        &self,
        novel_id: u64,
        audio_id: u64,
        chapter_num: usize,
        episode: &Episode,
        date_prefix: &str,
        prefetched: Option<Vec<u8>>,
    ) -> Result<()> {
        let target = paths::chapter_key(date_prefix, audio_id, chapter_num);
        let audio_key = match prefetched {
            Some(bytes) => {
                self.ctx
                    .relay
                    .store()
                    .upload(bytes, &target, content_types::MP3)
                    .await?
                    .resource_key
            }
            None => {
                let url = self.audio_url(episode).await?;
                self.ctx
                    .relay
                    .process_direct_file(&url, &target, content_types::MP3, &no_progress)
                    .await?
                    .resource_key
            }
        };
        let record = chapter_record(
            novel_id,
            audio_id,
            chapter_num,
            episode,
            audio_key,
            self.ctx.config.backend.title_max_len,
        );
        let response = self.ctx.backend.sync_audio_chapter(&record).await?;
        if !response.success {
            return Err(AppError::backend(
                response
                    .message
                    .unwrap_or_else(|| "chapter sync rejected".into()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemPipeline for AudioPipeline {
    fn name(&self) -> &'static str {
        "audio"
    }

    async fn execute(&self, task: &SyncTask) -> Result<TaskResult> {
        let item = task.item();
        let date_prefix = paths::today_prefix();

        task.report("id", 5, None);
        let audio_id = item
            .source_id
            .filter(|id| *id > 0)
            .or_else(|| extract_audio_id(&item.url))
            .ok_or_else(|| AppError::validation(format!("no audio id in {}", item.url)))?;

        task.report("probe", 8, None);
        if let Some(hit) = self.ctx.probe(RecordKind::AudioNovel, audio_id).await {
            return Ok(TaskResult::skipped(hit.remote_id));
        }

        task.report("detail", 10, None);
        let detail = self.ctx.source.fetch_detail(&item.url).await?;
        if detail.title.trim().is_empty() {
            return Err(AppError::validation(format!("empty title for {}", item.url)));
        }
        let audio = detail.audio.clone().unwrap_or_default();

        let mut guard = self.ctx.locks.acquire(audio_id).await;
        if let Some(done) = guard.settled() {
            return Ok(TaskResult::skipped(done.remote_id)
                .with_message("synced by a concurrent task"));
        }

        task.report("cover", 20, None);
        let cover_key = match detail.cover_url.as_deref().or(item.cover_url.as_deref()) {
            Some(url) => self.upload_cover(url, &date_prefix, audio_id).await,
            None => None,
        };

        let episodes = episodes_of(detail.title.trim(), &audio);
        if episodes.is_empty() {
            return Err(AppError::validation(format!(
                "no episodes for audio {audio_id}"
            )));
        }

        task.report("verify", 25, None);
        let first_url = self.audio_url(&episodes[0]).await?;
        let first_audio = self
            .ctx
            .relay
            .downloader()
            .get_bytes(&first_url)
            .await
            .ok()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AppError::relay(format!("first episode audio unavailable: {first_url}")))?;

        let category = item
            .category
            .as_deref()
            .or(audio.category_name.as_deref())
            .or(audio.category.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();

        if let Some(hit) = self.ctx.probe(RecordKind::AudioNovel, audio_id).await {
            let result = TaskResult::skipped(hit.remote_id);
            guard.settle(result.clone());
            return Ok(result);
        }

        task.report("novel", 30, None);
        let record = novel_record(
            audio_id,
            &detail,
            &audio,
            &category,
            cover_key,
            episodes.len(),
            self.ctx.config.backend.title_max_len,
        );
        let response = self.ctx.backend.sync_audio_novel(&record).await?;
        let novel_id = match (response.success, response.remote_id) {
            (true, Some(id)) => id,
            _ => {
                return Err(AppError::backend(
                    response
                        .message
                        .unwrap_or_else(|| "novel sync returned no id".into()),
                ));
            }
        };

        let total = episodes.len();
        let mut synced = 0;
        let mut first_audio = Some(first_audio);
        for (i, episode) in episodes.iter().enumerate() {
            let chapter_num = i + 1;
            let prefetched = if i == 0 { first_audio.take() } else { None };
            match self
                .sync_chapter(novel_id, audio_id, chapter_num, episode, &date_prefix, prefetched)
                .await
            {
                Ok(()) => synced += 1,
                Err(e) => log::warn!(
                    "Audio {} chapter {} failed: {}",
                    audio_id,
                    chapter_num,
                    e
                ),
            }
            let percent = CHAPTERS_START as usize + (chapter_num * CHAPTERS_SPAN as usize + total / 2) / total;
            task.report(
                "chapters",
                percent as u8,
                Some(format!("{chapter_num}/{total}")),
            );
        }

        let result = TaskResult::synced(Some(novel_id), response.is_new)
            .with_message(format!("synced {synced}/{total} chapters"));
        guard.settle(result.clone());
        Ok(result)
    }
}
