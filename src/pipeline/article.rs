// src/pipeline/article.rs

//! Article and video post pipeline.
//!
//! Steps and progress checkpoints:
//!
//! | step      | percent |
//! |-----------|---------|
//! | probe     | 5       |
//! | cover     | 10      |
//! | detail    | 20      |
//! | images    | 30-60   |
//! | videos    | 65-90   |
//! | transform | 92      |
//! | sync      | 95-100  |

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{ItemDetail, SyncRecord, TaskResult, nonzero};
use crate::pipeline::locks::SyncGuard;
use crate::pipeline::task::{ItemPipeline, RecordKind, SyncTask, TaskContext};
use crate::services::content::ContentTransform;
use crate::services::relay::RelayPhase;
use crate::storage::content_types;
use crate::utils::paths;
use crate::utils::truncate_chars;
use crate::utils::url::image_extension;

const IMAGES_START: u8 = 30;
const IMAGES_SPAN: u8 = 30;
const VIDEOS_START: u8 = 65;
const VIDEOS_SPAN: u8 = 25;

/// Percent within `start..start+span` after `done` of `total` units.
fn span_percent(start: u8, span: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return start + span;
    }
    let done = done.min(total);
    start + (span as usize * done / total) as u8
}

/// Result a task returns when an earlier holder of its id already synced.
fn reused(result: &TaskResult) -> TaskResult {
    TaskResult::skipped(result.remote_id).with_message("synced by a concurrent task")
}

pub struct ArticlePipeline {
    ctx: TaskContext,
}

impl ArticlePipeline {
    pub fn new(ctx: TaskContext) -> Self {
        Self { ctx }
    }

    /// Download, decrypt and store the cover. Returns its key.
    async fn relay_cover(&self, url: &str, date_prefix: &str, source_id: u64) -> Option<String> {
        let bytes = match self.ctx.relay.downloader().get_bytes(url).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                log::warn!("Empty cover body from {}", url);
                return None;
            }
            Err(e) => {
                log::warn!("Cover download failed for {}: {}", url, e);
                return None;
            }
        };
        let bytes = self.ctx.decryptor.decrypt_image(bytes);
        let key = paths::cover_key(date_prefix, source_id);
        match self
            .ctx
            .relay
            .store()
            .upload(bytes, &key, content_types::JPEG)
            .await
        {
            Ok(outcome) => Some(outcome.resource_key),
            Err(e) => {
                log::warn!("Cover upload failed for {}: {}", url, e);
                None
            }
        }
    }

    async fn relay_image(&self, url: &str) -> Result<String> {
        let bytes = self.ctx.relay.downloader().get_bytes(url).await?;
        if bytes.is_empty() {
            return Err(AppError::relay(format!("empty image body from {url}")));
        }
        let bytes = self.ctx.decryptor.decrypt_image(bytes);
        let ext = image_extension(url);
        let outcome = self
            .ctx
            .relay
            .store()
            .upload(
                bytes,
                &paths::image_upload_key(ext),
                &content_types::for_image_ext(ext),
            )
            .await?;
        Ok(outcome.resource_key)
    }

    /// Relay every image; failures are left out of the mapping.
    async fn relay_images(&self, task: &SyncTask, urls: &[String]) -> HashMap<String, String> {
        let mut mapping = HashMap::new();
        let total = urls.len();
        for (i, url) in urls.iter().enumerate() {
            match self.relay_image(url).await {
                Ok(key) => {
                    mapping.insert(url.clone(), key);
                }
                Err(e) => log::warn!("Image relay failed for {}: {}", url, e),
            }
            task.report(
                "images",
                span_percent(IMAGES_START, IMAGES_SPAN, i + 1, total),
                Some(format!("{}/{}", i + 1, total)),
            );
        }
        if mapping.len() < total {
            log::warn!(
                "Task {}: {} of {} images relayed",
                task.id(),
                mapping.len(),
                total
            );
        }
        mapping
    }

    /// Relay every video into its own sub directory. A failed video is
    /// `None` at its index.
    async fn relay_videos(
        &self,
        task: &SyncTask,
        urls: &[String],
        video_dir: &str,
    ) -> Vec<Option<String>> {
        let total = urls.len();
        let mut keys = Vec::with_capacity(total);
        for (i, url) in urls.iter().enumerate() {
            let start = span_percent(VIDEOS_START, VIDEOS_SPAN, i, total);
            let end = span_percent(VIDEOS_START, VIDEOS_SPAN, i + 1, total);
            let progress = |phase: RelayPhase, done: usize, of: usize| {
                let half = (end - start) / 2;
                let base = match phase {
                    RelayPhase::DownloadingSegments | RelayPhase::DownloadingFile => start,
                    RelayPhase::UploadingSegments | RelayPhase::UploadingFile => start + half,
                };
                task.report(
                    "videos",
                    span_percent(base, half, done, of),
                    Some(format!("video {}/{}: {:?} {}/{}", i + 1, total, phase, done, of)),
                );
            };
            let target = format!("{}/{}", video_dir, paths::video_subdir(i));
            let relayed = self.ctx.relay.relay_video(url, &target, &progress).await;
            keys.push(relayed.map(|media| media.resource_key));
            task.report("videos", end, Some(format!("{}/{}", i + 1, total)));
        }
        keys
    }

    /// Relay media, transform the body and upsert the record while holding
    /// the id's lock.
    async fn relay_and_sync(
        &self,
        task: &SyncTask,
        detail: &ItemDetail,
        source_id: u64,
        date_prefix: &str,
        mut cover_key: Option<String>,
        guard: &mut SyncGuard,
    ) -> Result<TaskResult> {
        let config = &self.ctx.config;

        if cover_key.is_none() {
            if let Some(url) = &detail.cover_url {
                cover_key = self.relay_cover(url, date_prefix, source_id).await;
            }
        }

        task.report("images", IMAGES_START, None);
        let images = self.relay_images(task, &detail.image_urls).await;

        task.report("videos", VIDEOS_START, None);
        let video_dir = paths::video_dir(date_prefix, source_id);
        let videos = self
            .relay_videos(task, &detail.video_urls, &video_dir)
            .await;
        let has_video = videos.iter().any(Option::is_some);
        if !detail.video_urls.is_empty() && !has_video {
            log::warn!("Task {}: every video failed to relay", task.id());
        }
        let had_media = !detail.image_urls.is_empty() || !detail.video_urls.is_empty();
        if had_media && images.is_empty() && !has_video {
            log::warn!("Task {}: no media relayed, syncing text only", task.id());
        }

        task.report("transform", 92, None);
        let content = ContentTransform {
            base_url: &task.item().url,
            image_attrs: &config.content.image_attrs,
            images: &images,
            videos: &videos,
            cover_key: cover_key.as_deref(),
        }
        .apply(&detail.body_html);

        task.report("sync", 95, None);
        if let Some(hit) = self.ctx.probe(RecordKind::Post, source_id).await {
            log::info!("Task {}: {} appeared before insert", task.id(), source_id);
            let result = TaskResult::skipped(hit.remote_id);
            guard.settle(result.clone());
            return Ok(result);
        }

        let counters = &detail.counters;
        let record = SyncRecord {
            source_id,
            uid: config.backend.sync_uid.clone(),
            title: truncate_chars(detail.title.trim(), config.backend.title_max_len),
            content,
            description: None,
            cover_image: cover_key,
            has_video,
            views_count: nonzero(counters.views),
            likes_count: nonzero(counters.likes),
            comments_count: nonzero(counters.comments),
            shares_count: nonzero(counters.shares),
            purchase_count: nonzero(counters.purchases),
            visibility: config.backend.visibility.clone(),
            assigned_role_code: config.backend.role_code.clone(),
            created_at: detail.published_at.clone(),
            updated_at: detail.updated_at.clone(),
        };
        let response = self.ctx.backend.sync(&record).await?;
        if !response.success {
            return Err(AppError::backend(
                response.message.unwrap_or_else(|| "sync rejected".into()),
            ));
        }
        let result = TaskResult::synced(response.remote_id, response.is_new);
        guard.settle(result.clone());
        Ok(result)
    }
}

#[async_trait]
impl ItemPipeline for ArticlePipeline {
    fn name(&self) -> &'static str {
        "article"
    }

    async fn execute(&self, task: &SyncTask) -> Result<TaskResult> {
        let item = task.item();
        let date_prefix = paths::today_prefix();

        task.report("probe", 5, None);
        let probed_id = item.resolve_source_id();
        if let Some(id) = probed_id {
            if let Some(hit) = self.ctx.probe(RecordKind::Post, id).await {
                return Ok(TaskResult::skipped(hit.remote_id));
            }
        }

        task.report("cover", 10, None);
        let mut cover_key = None;
        if let (Some(url), Some(id)) = (&item.cover_url, probed_id) {
            cover_key = self.relay_cover(url, &date_prefix, id).await;
        }

        task.report("detail", 20, None);
        let mut detail = self.ctx.source.fetch_detail(&item.url).await?;
        detail.merge_item(item);

        let source_id = detail.source_id.filter(|id| *id > 0).or(probed_id);
        if let Some(id) = source_id {
            if probed_id != Some(id) {
                if let Some(hit) = self.ctx.probe(RecordKind::Post, id).await {
                    return Ok(TaskResult::skipped(hit.remote_id));
                }
                // The pre-detail cover was stored under a different id.
                cover_key = None;
            }
        }

        let source_id = source_id
            .ok_or_else(|| AppError::validation(format!("no source id for {}", item.url)))?;
        if detail.title.trim().is_empty() {
            return Err(AppError::validation(format!("empty title for {}", item.url)));
        }

        let mut guard = self.ctx.locks.acquire(source_id).await;
        if let Some(done) = guard.settled() {
            log::info!("Task {}: reusing outcome for {}", task.id(), source_id);
            return Ok(reused(done));
        }
        self.relay_and_sync(task, &detail, source_id, &date_prefix, cover_key, &mut guard)
            .await
    }
}
