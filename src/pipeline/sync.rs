// src/pipeline/sync.rs

//! Batch entry point: wire the services from configuration and drain a
//! queue of items.

use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::models::{Config, QueueStats, RawItem};
use crate::pipeline::article::ArticlePipeline;
use crate::pipeline::audio::AudioPipeline;
use crate::pipeline::locks::SyncLocks;
use crate::pipeline::queue::TaskQueue;
use crate::pipeline::task::{ItemPipeline, Observer, TaskContext};
use crate::services::backend::HttpBackendClient;
use crate::services::decrypt::ImageDecryptor;
use crate::services::extract::{HtmlContentSource, SourceKind};
use crate::services::relay::MediaRelay;
use crate::services::source::HttpPageFetcher;
use crate::storage::build_store;
use crate::utils::http::HttpFetcher;
use crate::utils::log;

/// Build the shared task dependencies from configuration.
pub async fn build_context(config: &Config, kind: SourceKind) -> Result<TaskContext> {
    let fetcher = HttpFetcher::new(&config.crawler)?;
    let store = build_store(&config.storage, fetcher.client().clone()).await?;
    let backend = HttpBackendClient::new(fetcher.clone(), &config.backend)?;
    let source = HtmlContentSource::new(
        Arc::new(HttpPageFetcher::new(fetcher.clone())),
        kind,
        &config.extract,
        &config.content,
    )?;
    log::info(&format!("Media store: {}", store.name()));

    Ok(TaskContext {
        config: Arc::new(config.clone()),
        backend: Arc::new(backend),
        source: Arc::new(source),
        relay: MediaRelay::new(Arc::new(fetcher), store, &config.relay),
        decryptor: ImageDecryptor::from_config(&config.decrypt)?,
        locks: Arc::new(SyncLocks::new()),
    })
}

/// Pipeline for a source kind.
pub fn pipeline_for(kind: SourceKind, ctx: TaskContext) -> Arc<dyn ItemPipeline> {
    match kind {
        SourceKind::Article => Arc::new(ArticlePipeline::new(ctx)),
        SourceKind::Audio => Arc::new(AudioPipeline::new(ctx)),
    }
}

/// Run `items` through `pipeline` and log a summary.
pub async fn run_batch(
    pipeline: Arc<dyn ItemPipeline>,
    max_concurrent: usize,
    items: Vec<RawItem>,
    observer: Option<Observer>,
) -> QueueStats {
    let start_time = Utc::now();
    let mut queue = TaskQueue::new(pipeline.clone(), max_concurrent);
    if let Some(observer) = observer {
        queue = queue.with_observer(observer);
    }
    queue.add_tasks(items);
    let stats = queue.start().await;

    let skipped = queue
        .tasks()
        .iter()
        .filter(|t| t.result().is_some_and(|r| r.skipped))
        .count();
    let elapsed = Utc::now() - start_time;
    log::summary(
        &format!("{} sync", pipeline.name()),
        &[
            ("Total", stats.total.to_string()),
            ("Completed", stats.completed.to_string()),
            ("Skipped", skipped.to_string()),
            ("Failed", stats.failed.to_string()),
            ("Cancelled", stats.cancelled.to_string()),
            ("Elapsed", format!("{}s", elapsed.num_seconds())),
        ],
    );
    for task in queue.tasks() {
        if let Some(error) = task.error() {
            log::sub_item(&format!("{} failed: {}", task.id(), error));
        }
    }
    stats
}

/// Sync a batch of items end to end.
pub async fn run_sync(
    config: &Config,
    items: Vec<RawItem>,
    kind: SourceKind,
    observer: Option<Observer>,
) -> Result<QueueStats> {
    config.validate()?;
    config.validate_backend()?;

    log::header(&format!("Syncing {} items", items.len()));
    let ctx = build_context(config, kind).await?;
    let pipeline = pipeline_for(kind, ctx);
    Ok(run_batch(pipeline, config.queue.max_concurrent, items, observer).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemDetail, StorageBackend};
    use crate::testing::{FakeBackend, MemoryDownloader, MemoryStore, StaticSource};

    #[tokio::test]
    async fn test_run_sync_rejects_missing_backend() {
        let config = Config::default();
        let err = run_sync(&config, Vec::new(), SourceKind::Article, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("backend.base_url"));
    }

    #[tokio::test]
    async fn test_build_context_with_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Local;
        config.storage.local_root = dir.path().to_path_buf();
        config.backend.base_url = "https://api.example.com".into();
        let ctx = build_context(&config, SourceKind::Audio).await.unwrap();
        assert_eq!(ctx.relay.store().name(), "local");
        assert_eq!(pipeline_for(SourceKind::Audio, ctx).name(), "audio");
    }

    #[tokio::test]
    async fn test_run_batch_with_fakes() {
        let source = Arc::new(StaticSource::default());
        source.insert(
            "https://site.example/archives/11/",
            ItemDetail {
                source_id: Some(11),
                title: "Eleven".into(),
                body_html: "<p>text</p>".into(),
                ..ItemDetail::default()
            },
        );
        let backend = Arc::new(FakeBackend::default());
        let config = Config::default();
        let ctx = TaskContext {
            relay: MediaRelay::new(
                Arc::new(MemoryDownloader::default()),
                Arc::new(MemoryStore::default()),
                &config.relay,
            ),
            config: Arc::new(config),
            backend: backend.clone(),
            source,
            decryptor: ImageDecryptor::default(),
            locks: Arc::new(SyncLocks::new()),
        };
        let items = vec![
            RawItem {
                id: "item-11".into(),
                url: "https://site.example/archives/11/".into(),
                ..RawItem::default()
            },
            RawItem {
                id: "item-12".into(),
                url: "https://site.example/archives/12/".into(),
                ..RawItem::default()
            },
        ];
        let stats = run_batch(pipeline_for(SourceKind::Article, ctx), 2, items, None).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(backend.sync_count(), 1);
    }
}
