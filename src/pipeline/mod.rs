//! Pipeline entry points for sync operations.
//!
//! - `run_sync`: Relay and sync a batch of list items
//! - `TaskQueue`: Bounded-concurrency queue of `SyncTask`s
//! - `ArticlePipeline` / `AudioPipeline`: Per-item steps

pub mod article;
pub mod audio;
pub mod locks;
pub mod queue;
pub mod sync;
pub mod task;

pub use article::ArticlePipeline;
pub use audio::AudioPipeline;
pub use locks::SyncLocks;
pub use queue::TaskQueue;
pub use sync::{build_context, run_sync};
pub use task::{ItemPipeline, Observer, SyncTask, TaskContext};
