// src/testing.rs

//! In-memory fakes for the network-facing traits.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{
    AudioChapterRecord, AudioNovelRecord, ExistsStatus, ItemDetail, RawItem, SyncRecord,
    SyncResponse,
};
use crate::services::backend::BackendClient;
use crate::services::source::{Category, ContentSource, ListFilter, PageFetcher, PageSession};
use crate::storage::{MediaStore, UploadOutcome};
use crate::utils::http::Downloader;

/// Serves registered bodies; unknown URLs fail.
#[derive(Default)]
pub struct MemoryDownloader {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MemoryDownloader {
    pub fn insert(&self, url: &str, body: Vec<u8>) {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn remove(&self, url: &str) {
        self.bodies.lock().unwrap().remove(url);
    }

    /// Fail the next `times` requests for `url`.
    pub fn fail_times(&self, url: &str, times: u32) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Downloader for MemoryDownloader {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(AppError::fetch(url, "injected failure"));
                }
            }
        }
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Status {
                status: 404,
                url: url.to_string(),
            })
    }
}

/// Keeps uploads in memory; the resource key is the target path.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).map(|(b, _)| b.clone())
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects.lock().unwrap().get(path).map(|(_, t)| t.clone())
    }

    /// Reject every upload to `path`.
    pub fn fail_path(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        target_path: &str,
        content_type: &str,
    ) -> Result<UploadOutcome> {
        if self.failing.lock().unwrap().contains(target_path) {
            return Err(AppError::storage(format!("rejected {target_path}")));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(target_path.to_string(), (bytes, content_type.to_string()));
        Ok(UploadOutcome {
            resource_key: target_path.to_string(),
            public_url: None,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Page fetcher over a fixed URL to HTML map.
#[derive(Default)]
pub struct StaticPages {
    pages: Arc<Mutex<HashMap<String, String>>>,
}

impl StaticPages {
    pub fn insert(&self, url: &str, html: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
    }
}

struct StaticSession {
    pages: Arc<Mutex<HashMap<String, String>>>,
}

#[async_trait]
impl PageSession for StaticSession {
    async fn get_html(&mut self, url: &str) -> Result<String> {
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::fetch(url, "no such page"))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for StaticPages {
    async fn open_session(&self) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(StaticSession {
            pages: self.pages.clone(),
        }))
    }
}

/// Backend that upserts into memory and assigns ids from 1000.
pub struct FakeBackend {
    existing: Mutex<HashMap<u64, u64>>,
    appearing: Mutex<HashMap<u64, (usize, u64)>>,
    posts: Mutex<HashMap<u64, u64>>,
    novels: Mutex<HashMap<String, u64>>,
    pub synced: Mutex<Vec<SyncRecord>>,
    pub novel_records: Mutex<Vec<AudioNovelRecord>>,
    pub chapters: Mutex<Vec<AudioChapterRecord>>,
    exists_calls: AtomicUsize,
    next_id: AtomicU64,
    reject: Mutex<Option<String>>,
    exists_delay: Mutex<Option<Duration>>,
    sync_delay: Mutex<Option<Duration>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            existing: Mutex::default(),
            appearing: Mutex::default(),
            posts: Mutex::default(),
            novels: Mutex::default(),
            synced: Mutex::default(),
            novel_records: Mutex::default(),
            chapters: Mutex::default(),
            exists_calls: AtomicUsize::new(0),
            next_id: AtomicU64::new(1000),
            reject: Mutex::default(),
            exists_delay: Mutex::default(),
            sync_delay: Mutex::default(),
        }
    }
}

impl FakeBackend {
    /// Mark `source_id` as already present with `remote_id`, for posts and novels.
    pub fn preexisting(&self, source_id: u64, remote_id: u64) {
        self.existing.lock().unwrap().insert(source_id, remote_id);
    }

    /// Report `source_id` as present with `remote_id` once more than
    /// `calls` existence checks have been made.
    pub fn appears_after(&self, source_id: u64, remote_id: u64, calls: usize) {
        self.appearing
            .lock()
            .unwrap()
            .insert(source_id, (calls, remote_id));
    }

    /// Reject every upsert with `message`.
    pub fn reject_with(&self, message: &str) {
        *self.reject.lock().unwrap() = Some(message.to_string());
    }

    pub fn delay_exists(&self, delay: Duration) {
        *self.exists_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_sync(&self, delay: Duration) {
        *self.sync_delay.lock().unwrap() = Some(delay);
    }

    pub fn sync_count(&self) -> usize {
        self.synced.lock().unwrap().len()
    }

    pub fn exists_count(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    fn rejection(&self) -> Option<SyncResponse> {
        self.reject.lock().unwrap().clone().map(|message| SyncResponse {
            success: false,
            message: Some(message),
            ..SyncResponse::default()
        })
    }

    async fn pause(delay: &Mutex<Option<Duration>>) {
        let delay = *delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn lookup(
        &self,
        ids: &[u64],
        synced: &HashMap<u64, u64>,
        call: usize,
    ) -> HashMap<u64, ExistsStatus> {
        let existing = self.existing.lock().unwrap();
        let appearing = self.appearing.lock().unwrap();
        ids.iter()
            .map(|id| {
                let remote = existing
                    .get(id)
                    .or_else(|| synced.get(id))
                    .or_else(|| {
                        appearing
                            .get(id)
                            .filter(|(after, _)| call > *after)
                            .map(|(_, remote)| remote)
                    })
                    .copied();
                (
                    *id,
                    ExistsStatus {
                        exists: remote.is_some(),
                        remote_id: remote,
                    },
                )
            })
            .collect()
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn exists_batch(&self, ids: &[u64]) -> Result<HashMap<u64, ExistsStatus>> {
        let call = self.exists_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Self::pause(&self.exists_delay).await;
        let posts = self.posts.lock().unwrap().clone();
        Ok(self.lookup(ids, &posts, call))
    }

    async fn sync(&self, record: &SyncRecord) -> Result<SyncResponse> {
        Self::pause(&self.sync_delay).await;
        if let Some(rejected) = self.rejection() {
            return Ok(rejected);
        }
        self.synced.lock().unwrap().push(record.clone());
        let mut posts = self.posts.lock().unwrap();
        let is_new = !posts.contains_key(&record.source_id);
        let remote_id = *posts
            .entry(record.source_id)
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(SyncResponse {
            success: true,
            remote_id: Some(remote_id),
            is_new,
            message: None,
        })
    }

    async fn audio_exists_batch(&self, ids: &[u64]) -> Result<HashMap<u64, ExistsStatus>> {
        let call = self.exists_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Self::pause(&self.exists_delay).await;
        let novels: HashMap<u64, u64> = self
            .novels
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(k, v)| Some((k.parse().ok()?, *v)))
            .collect();
        Ok(self.lookup(ids, &novels, call))
    }

    async fn sync_audio_novel(&self, record: &AudioNovelRecord) -> Result<SyncResponse> {
        if let Some(rejected) = self.rejection() {
            return Ok(rejected);
        }
        self.novel_records.lock().unwrap().push(record.clone());
        let mut novels = self.novels.lock().unwrap();
        let is_new = !novels.contains_key(&record.source_id);
        let remote_id = *novels
            .entry(record.source_id.clone())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(SyncResponse {
            success: true,
            remote_id: Some(remote_id),
            is_new,
            message: None,
        })
    }

    async fn sync_audio_chapter(&self, record: &AudioChapterRecord) -> Result<SyncResponse> {
        self.chapters.lock().unwrap().push(record.clone());
        Ok(SyncResponse {
            success: true,
            remote_id: Some(self.next_id.fetch_add(1, Ordering::SeqCst)),
            is_new: true,
            message: None,
        })
    }
}

/// Content source over prepared details keyed by detail URL.
#[derive(Default)]
pub struct StaticSource {
    details: Mutex<HashMap<String, ItemDetail>>,
    audio: Mutex<HashMap<String, String>>,
    detail_calls: AtomicUsize,
}

impl StaticSource {
    pub fn insert(&self, url: &str, detail: ItemDetail) {
        self.details.lock().unwrap().insert(url.to_string(), detail);
    }

    /// Audio URL found on an episode page.
    pub fn insert_audio(&self, episode_url: &str, audio_url: &str) {
        self.audio
            .lock()
            .unwrap()
            .insert(episode_url.to_string(), audio_url.to_string());
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for StaticSource {
    async fn fetch_detail(&self, url: &str) -> Result<ItemDetail> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::fetch(url, "no such detail"))
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(Vec::new())
    }

    async fn list_page(
        &self,
        _category: &Category,
        _page: u32,
        _filter: &ListFilter,
    ) -> Result<Vec<RawItem>> {
        Ok(Vec::new())
    }

    async fn resolve_audio_url(&self, episode_url: &str) -> Result<Option<String>> {
        Ok(self.audio.lock().unwrap().get(episode_url).cloned())
    }
}
