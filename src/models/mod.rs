// src/models/mod.rs

//! Domain models for the sync pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod item;
mod record;
mod task;

// Re-export all public types
pub use config::{
    BackendConfig, Config, ContentConfig, CrawlerConfig, DecryptConfig, ExtractConfig,
    LoggingConfig, QueueConfig, RelayConfig, StorageBackend, StorageConfig,
};
pub use item::{AudioDetail, Counters, Episode, ItemDetail, RawItem, distinct};
pub use record::{
    AudioChapterRecord, AudioNovelRecord, ExistsStatus, SerialStatus, SyncEnvelope, SyncRecord,
    SyncResponse, nonzero, parse_count, parse_rating,
};
pub use task::{QueueStats, TaskResult, TaskSnapshot, TaskStatus};
