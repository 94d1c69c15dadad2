// src/services/relay.rs

//! Media relay: re-hosts remote video and audio on the media store.
//!
//! HLS manifests are downloaded, every segment is fetched and re-uploaded
//! next to a rewritten `index.m3u8` that references segments by basename.
//! Single files (MP4, MP3) are downloaded and uploaded as-is.

use std::sync::Arc;

use futures::future::join_all;
use m3u8_rs::{KeyMethod, Playlist, parse_playlist_res};

use crate::error::{AppError, Result};
use crate::models::RelayConfig;
use crate::storage::{MediaStore, UploadOutcome, content_types};
use crate::utils::http::Downloader;
use crate::utils::{paths, url};

const KEY_TAG: &str = "#EXT-X-KEY";
const PLAYLIST_TYPE_VOD: &str = "#EXT-X-PLAYLIST-TYPE:VOD";

/// Which part of a relay is reporting progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    DownloadingSegments,
    UploadingSegments,
    DownloadingFile,
    UploadingFile,
}

/// Progress callback: `(phase, completed, total)`.
pub type ProgressFn<'a> = &'a (dyn Fn(RelayPhase, usize, usize) + Send + Sync);

/// Callback for callers that don't track progress.
pub fn no_progress(_: RelayPhase, _: usize, _: usize) {}

fn method_name(method: &KeyMethod) -> String {
    match method {
        KeyMethod::None => "NONE".to_string(),
        KeyMethod::AES128 => "AES-128".to_string(),
        KeyMethod::SampleAES => "SAMPLE-AES".to_string(),
        KeyMethod::Other(other) => other.clone(),
    }
}

/// A distinct encryption key referenced by `#EXT-X-KEY` directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDirective {
    pub method: String,
    /// `URI` as written in the playlist
    pub source_uri: String,
    /// Absolute key URL
    pub uri: String,
    /// Explicit IV; absent means the media sequence number is the IV
    pub iv: Option<String>,
    pub keyformat: Option<String>,
}

impl KeyDirective {
    fn from_key(key: &m3u8_rs::Key, base_url: &str) -> Option<Self> {
        if key.method == KeyMethod::None {
            return None;
        }
        let source_uri = key.uri.clone()?;
        Some(Self {
            method: method_name(&key.method),
            uri: url::resolve(base_url, &source_uri),
            source_uri,
            iv: key.iv.clone(),
            keyformat: key.keyformat.clone(),
        })
    }

    /// Whether a raw `#EXT-X-KEY` line references this key.
    fn matches_line(&self, line: &str) -> bool {
        line.contains(&format!("URI=\"{}\"", self.source_uri))
            || line.contains(&format!("URI={}", self.source_uri))
    }

    /// Directive pointing at the relayed key file in the manifest directory.
    fn relayed_line(&self, file_name: &str) -> String {
        let mut line = format!("{KEY_TAG}:METHOD={},URI=\"{file_name}\"", self.method);
        if let Some(iv) = &self.iv {
            line.push_str(&format!(",IV={iv}"));
        }
        if let Some(format) = &self.keyformat {
            line.push_str(&format!(",KEYFORMAT=\"{format}\""));
        }
        line
    }
}

/// One line of a media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine {
    /// `#`-prefixed line, kept verbatim
    Directive(String),
    /// `#EXT-X-KEY` line; `key` indexes the manifest's distinct keys and
    /// is `None` when the line names no usable key
    Key { key: Option<usize>, original: String },
    /// Segment reference; `index` into the segment list
    Segment { index: usize, original: String },
    Blank,
}

/// A parsed media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedManifest {
    pub lines: Vec<ManifestLine>,
    /// Absolute segment URLs in playlist order
    pub segment_urls: Vec<String>,
    /// Distinct keys in order of first use
    pub keys: Vec<KeyDirective>,
    pub has_playlist_type: bool,
}

/// A downloaded playlist, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistKind {
    /// Absolute variant playlist URLs, highest bandwidth first
    Master(Vec<String>),
    Media(ParsedManifest),
}

/// Classify and parse a playlist. References resolve against the
/// manifest's directory.
pub fn parse_playlist(content: &str, manifest_url: &str) -> Result<PlaylistKind> {
    let base_url = url::directory_of(manifest_url);
    let content = content.trim_start();
    let playlist = parse_playlist_res(content.as_bytes())
        .map_err(|_| AppError::relay(format!("{manifest_url}: unparseable playlist")))?;

    let media = match playlist {
        Playlist::MasterPlaylist(master) => {
            let mut variants: Vec<_> = master.variants.iter().filter(|v| !v.is_i_frame).collect();
            variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
            return Ok(PlaylistKind::Master(
                variants
                    .into_iter()
                    .map(|v| url::resolve(base_url, &v.uri))
                    .collect(),
            ));
        }
        Playlist::MediaPlaylist(media) => media,
    };

    let mut keys: Vec<KeyDirective> = Vec::new();
    for key in media.segments.iter().filter_map(|s| s.key.as_ref()) {
        if let Some(directive) = KeyDirective::from_key(key, base_url) {
            if !keys.iter().any(|k| k.uri == directive.uri) {
                keys.push(directive);
            }
        }
    }

    let mut lines = Vec::new();
    let mut segment_count = 0;
    for raw in content.lines() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            lines.push(ManifestLine::Blank);
        } else if trimmed.starts_with(KEY_TAG) {
            if trimmed.contains("METHOD=NONE") {
                lines.push(ManifestLine::Directive(trimmed.to_string()));
            } else {
                lines.push(ManifestLine::Key {
                    key: keys.iter().position(|k| k.matches_line(trimmed)),
                    original: trimmed.to_string(),
                });
            }
        } else if trimmed.starts_with('#') {
            lines.push(ManifestLine::Directive(trimmed.to_string()));
        } else {
            lines.push(ManifestLine::Segment {
                index: segment_count,
                original: trimmed.to_string(),
            });
            segment_count += 1;
        }
    }

    if segment_count != media.segments.len() {
        return Err(AppError::relay(format!(
            "{manifest_url}: {segment_count} segment lines but {} parsed segments",
            media.segments.len()
        )));
    }

    Ok(PlaylistKind::Media(ParsedManifest {
        lines,
        segment_urls: media
            .segments
            .iter()
            .map(|s| url::resolve(base_url, s.uri.trim()))
            .collect(),
        keys,
        has_playlist_type: media.playlist_type.is_some(),
    }))
}

/// Parse a media playlist; a master playlist is an error here.
pub fn parse_manifest(content: &str, manifest_url: &str) -> Result<ParsedManifest> {
    match parse_playlist(content, manifest_url)? {
        PlaylistKind::Media(manifest) => Ok(manifest),
        PlaylistKind::Master(_) => Err(AppError::relay(format!(
            "{manifest_url}: expected a media playlist, got a master playlist"
        ))),
    }
}

/// Rewrite a playlist to reference relayed segments by basename.
///
/// `relayed_keys[i]` tells whether key `i` was relayed; key directives
/// point at the relayed key file when it was and are dropped otherwise.
/// `#EXT-X-PLAYLIST-TYPE:VOD` follows `#EXT-X-MEDIA-SEQUENCE` when the
/// source had no playlist type.
pub fn rewrite_manifest(
    manifest: &ParsedManifest,
    segment_keys: &[String],
    relayed_keys: &[bool],
) -> String {
    let mut out = Vec::with_capacity(manifest.lines.len() + 1);
    let mut inserted_type = manifest.has_playlist_type;

    for line in &manifest.lines {
        match line {
            ManifestLine::Key { key: Some(index), .. } => {
                let relayed = relayed_keys.get(*index).copied().unwrap_or(false);
                if let (true, Some(key)) = (relayed, manifest.keys.get(*index)) {
                    out.push(key.relayed_line(&paths::key_file_name(*index)));
                }
            }
            ManifestLine::Key { key: None, .. } => {}
            ManifestLine::Directive(d) => {
                out.push(d.clone());
                if !inserted_type && d.starts_with("#EXT-X-MEDIA-SEQUENCE") {
                    out.push(PLAYLIST_TYPE_VOD.to_string());
                    inserted_type = true;
                }
            }
            ManifestLine::Segment { index, original } => {
                let name = segment_keys
                    .get(*index)
                    .map(|k| url::basename(k).to_string())
                    .unwrap_or_else(|| original.clone());
                out.push(name);
            }
            ManifestLine::Blank => out.push(String::new()),
        }
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

/// One manifest relay in flight.
///
/// Holds a resource key slot per segment; the job only succeeds when
/// every slot is filled.
#[derive(Debug)]
pub struct RelayJob {
    pub manifest_url: String,
    pub target_dir: String,
    pub manifest: ParsedManifest,
    pub segment_keys: Vec<Option<String>>,
}

impl RelayJob {
    pub fn new(manifest_url: &str, target_dir: &str, manifest: ParsedManifest) -> Self {
        let count = manifest.segment_urls.len();
        Self {
            manifest_url: manifest_url.to_string(),
            target_dir: target_dir.trim_end_matches('/').to_string(),
            manifest,
            segment_keys: vec![None; count],
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segment_keys.len()
    }

    pub fn is_complete(&self) -> bool {
        !self.segment_keys.is_empty() && self.segment_keys.iter().all(Option::is_some)
    }

    /// All segment keys in order, or `None` while any is missing.
    pub fn resolved_keys(&self) -> Option<Vec<String>> {
        if !self.is_complete() {
            return None;
        }
        self.segment_keys.iter().cloned().collect()
    }
}

/// Result of a successful relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedMedia {
    /// Manifest or file key to reference from content
    pub resource_key: String,
    pub public_url: Option<String>,
    /// Number of segments relayed; 0 for single files
    pub segment_count: usize,
}

/// Downloads media and re-uploads it to the media store.
#[derive(Clone)]
pub struct MediaRelay {
    downloader: Arc<dyn Downloader>,
    store: Arc<dyn MediaStore>,
    max_workers: usize,
    retry_passes: u32,
}

impl MediaRelay {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        store: Arc<dyn MediaStore>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            downloader,
            store,
            max_workers: config.max_workers.max(1),
            retry_passes: config.retry_passes,
        }
    }

    pub fn store(&self) -> &Arc<dyn MediaStore> {
        &self.store
    }

    pub fn downloader(&self) -> &Arc<dyn Downloader> {
        &self.downloader
    }

    /// Relay an HLS manifest and all of its segments into `target_dir`.
    pub async fn process_manifest(
        &self,
        manifest_url: &str,
        target_dir: &str,
        progress: ProgressFn<'_>,
    ) -> Result<RelayedMedia> {
        let content = self.downloader.get_text(manifest_url).await?;
        let (media_url, manifest) = match parse_playlist(&content, manifest_url)? {
            PlaylistKind::Media(manifest) => (manifest_url.to_string(), manifest),
            PlaylistKind::Master(variants) => {
                let variant = variants.into_iter().next().ok_or_else(|| {
                    AppError::relay(format!("{manifest_url}: master playlist has no variants"))
                })?;
                log::info!("{} is a master playlist, following {}", manifest_url, variant);
                let content = self.downloader.get_text(&variant).await?;
                let manifest = parse_manifest(&content, &variant)?;
                (variant, manifest)
            }
        };
        if manifest.segment_urls.is_empty() {
            return Err(AppError::relay(format!("no segments in {media_url}")));
        }
        let mut job = RelayJob::new(&media_url, target_dir, manifest);
        log::info!(
            "Relaying {} ({} segments) into {}",
            media_url,
            job.segment_count(),
            job.target_dir
        );

        let mut relayed_keys = Vec::with_capacity(job.manifest.keys.len());
        for (index, key) in job.manifest.keys.iter().enumerate() {
            let target = paths::key_file_key(&job.target_dir, index);
            relayed_keys.push(self.relay_key(key, &target).await);
        }

        let segments = self.download_segments(&job, progress).await?;
        self.upload_segments(&mut job, segments, progress).await?;

        let keys = job.resolved_keys().ok_or_else(|| {
            AppError::relay(format!("{manifest_url}: segment keys incomplete"))
        })?;
        let rewritten = rewrite_manifest(&job.manifest, &keys, &relayed_keys);
        let outcome = self
            .store
            .upload(
                rewritten.into_bytes(),
                &paths::manifest_key(&job.target_dir),
                content_types::HLS_MANIFEST,
            )
            .await?;

        log::info!(
            "Relayed {} -> {} ({} segments)",
            manifest_url,
            outcome.resource_key,
            keys.len()
        );
        Ok(RelayedMedia {
            resource_key: outcome.resource_key,
            public_url: outcome.public_url,
            segment_count: keys.len(),
        })
    }

    /// Relay a single file to `target_path`.
    pub async fn process_direct_file(
        &self,
        file_url: &str,
        target_path: &str,
        content_type: &str,
        progress: ProgressFn<'_>,
    ) -> Result<RelayedMedia> {
        progress(RelayPhase::DownloadingFile, 0, 100);
        let bytes = self.downloader.get_bytes(file_url).await?;
        if bytes.is_empty() {
            return Err(AppError::relay(format!("empty body from {file_url}")));
        }
        progress(RelayPhase::DownloadingFile, 100, 100);

        progress(RelayPhase::UploadingFile, 0, 100);
        let outcome = self.store.upload(bytes, target_path, content_type).await?;
        progress(RelayPhase::UploadingFile, 100, 100);

        Ok(RelayedMedia {
            resource_key: outcome.resource_key,
            public_url: outcome.public_url,
            segment_count: 0,
        })
    }

    /// Relay one video URL into `target_dir`, choosing the path by URL kind.
    ///
    /// Returns `None` for unsupported URLs and failed relays.
    pub async fn relay_video(
        &self,
        video_url: &str,
        target_dir: &str,
        progress: ProgressFn<'_>,
    ) -> Option<RelayedMedia> {
        let result = if url::is_manifest_url(video_url) {
            self.process_manifest(video_url, target_dir, progress).await
        } else if url::is_mp4_url(video_url) {
            let target = format!("{}/video.mp4", target_dir.trim_end_matches('/'));
            self.process_direct_file(video_url, &target, content_types::MP4, progress)
                .await
        } else {
            log::warn!("Unsupported video URL, skipping: {}", video_url);
            return None;
        };

        match result {
            Ok(media) => Some(media),
            Err(e) => {
                log::warn!("Video relay failed for {}: {}", video_url, e);
                None
            }
        }
    }

    /// Download a key file and store it at `target` beside the manifest.
    /// Returns whether the key is usable from the rewritten manifest.
    async fn relay_key(&self, key: &KeyDirective, target: &str) -> bool {
        let bytes = match self.downloader.get_bytes(&key.uri).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                log::warn!("Empty key file at {}; dropping key directive", key.uri);
                return false;
            }
            Err(e) => {
                log::warn!("Key download failed ({}): {}; dropping key directive", key.uri, e);
                return false;
            }
        };
        match self
            .store
            .upload(bytes, target, content_types::HLS_KEY)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Key upload failed: {}; dropping key directive", e);
                false
            }
        }
    }

    async fn download_one(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.downloader.get_bytes(url).await?;
        if bytes.is_empty() {
            return Err(AppError::relay(format!("empty segment {url}")));
        }
        Ok(bytes)
    }

    /// Download every segment: batched all-settled passes, then serial
    /// retries of the failed indices.
    async fn download_segments(
        &self,
        job: &RelayJob,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<Vec<u8>>> {
        let urls = &job.manifest.segment_urls;
        let total = urls.len();
        let mut data: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut done = 0;

        for (batch_no, batch) in urls.chunks(self.max_workers).enumerate() {
            let offset = batch_no * self.max_workers;
            let results = join_all(batch.iter().map(|u| self.download_one(u))).await;
            for (i, result) in results.into_iter().enumerate() {
                match result {
                    Ok(bytes) => {
                        data[offset + i] = Some(bytes);
                        done += 1;
                    }
                    Err(e) => log::debug!("Segment {} download failed: {}", offset + i, e),
                }
            }
            progress(RelayPhase::DownloadingSegments, done, total);
        }

        for pass in 1..=self.retry_passes {
            let failed: Vec<usize> = (0..total).filter(|i| data[*i].is_none()).collect();
            if failed.is_empty() {
                break;
            }
            log::info!(
                "Retrying {} failed segment downloads (pass {}/{})",
                failed.len(),
                pass,
                self.retry_passes
            );
            for index in failed {
                if let Ok(bytes) = self.download_one(&urls[index]).await {
                    data[index] = Some(bytes);
                    done += 1;
                    progress(RelayPhase::DownloadingSegments, done, total);
                }
            }
        }

        let missing = data.iter().filter(|d| d.is_none()).count();
        if missing > 0 {
            return Err(AppError::relay(format!(
                "{}: {missing}/{total} segments failed to download",
                job.manifest_url
            )));
        }
        Ok(data.into_iter().flatten().collect())
    }

    async fn upload_one(&self, bytes: Vec<u8>, target: String) -> Result<UploadOutcome> {
        self.store
            .upload(bytes, &target, content_types::MPEG_TS)
            .await
    }

    /// Upload downloaded segments into the job's key slots with the same
    /// batching and retry scheme as downloads.
    async fn upload_segments(
        &self,
        job: &mut RelayJob,
        segments: Vec<Vec<u8>>,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        let total = segments.len();
        let targets: Vec<String> = (0..total)
            .map(|i| paths::segment_key(&job.target_dir, i))
            .collect();
        let mut done = 0;

        for (batch_no, batch) in segments.chunks(self.max_workers).enumerate() {
            let offset = batch_no * self.max_workers;
            let uploads = batch
                .iter()
                .enumerate()
                .map(|(i, bytes)| self.upload_one(bytes.clone(), targets[offset + i].clone()));
            for (i, result) in join_all(uploads).await.into_iter().enumerate() {
                match result {
                    Ok(outcome) => {
                        job.segment_keys[offset + i] = Some(outcome.resource_key);
                        done += 1;
                    }
                    Err(e) => log::debug!("Segment {} upload failed: {}", offset + i, e),
                }
            }
            progress(RelayPhase::UploadingSegments, done, total);
        }

        for pass in 1..=self.retry_passes {
            let failed: Vec<usize> = (0..total)
                .filter(|i| job.segment_keys[*i].is_none())
                .collect();
            if failed.is_empty() {
                break;
            }
            log::info!(
                "Retrying {} failed segment uploads (pass {}/{})",
                failed.len(),
                pass,
                self.retry_passes
            );
            for index in failed {
                let result = self
                    .upload_one(segments[index].clone(), targets[index].clone())
                    .await;
                if let Ok(outcome) = result {
                    job.segment_keys[index] = Some(outcome.resource_key);
                    done += 1;
                    progress(RelayPhase::UploadingSegments, done, total);
                }
            }
        }

        if !job.is_complete() {
            let missing = job.segment_keys.iter().filter(|k| k.is_none()).count();
            return Err(AppError::relay(format!(
                "{}: {missing}/{total} segments failed to upload",
                job.manifest_url
            )));
        }
        Ok(())
    }
}
