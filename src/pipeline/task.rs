// src/pipeline/task.rs

//! One item's trip through a sync pipeline.
//!
//! A [`SyncTask`] owns its lifecycle state. The pipeline it runs reports
//! progress through [`SyncTask::report`]; every change is pushed to the
//! registered [`Observer`] as a [`TaskSnapshot`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Config, ExistsStatus, RawItem, TaskResult, TaskSnapshot, TaskStatus};
use crate::pipeline::locks::SyncLocks;
use crate::services::backend::BackendClient;
use crate::services::decrypt::ImageDecryptor;
use crate::services::relay::MediaRelay;
use crate::services::source::ContentSource;
use crate::utils::retry::with_timeout;

/// Receives a snapshot on every task change.
pub type Observer = Arc<dyn Fn(&TaskSnapshot) + Send + Sync>;

/// Dependencies shared by every task of a batch.
#[derive(Clone)]
pub struct TaskContext {
    pub config: Arc<Config>,
    pub backend: Arc<dyn BackendClient>,
    pub source: Arc<dyn ContentSource>,
    pub relay: MediaRelay,
    pub decryptor: ImageDecryptor,
    pub locks: Arc<SyncLocks>,
}

/// Which backend collection an existence probe asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Post,
    AudioNovel,
}

impl TaskContext {
    /// Existence check bounded by `queue.probe_timeout_ms`.
    ///
    /// Returns the status only on a hit. Errors and timeouts are logged and
    /// count as a miss.
    pub async fn probe(&self, kind: RecordKind, id: u64) -> Option<ExistsStatus> {
        let timeout = Duration::from_millis(self.config.queue.probe_timeout_ms);
        let ids = [id];
        let lookup = async {
            match kind {
                RecordKind::Post => self.backend.exists_batch(&ids).await,
                RecordKind::AudioNovel => self.backend.audio_exists_batch(&ids).await,
            }
        };
        match with_timeout(timeout, "exists probe", lookup).await {
            Ok(found) => found.get(&id).copied().filter(|s| s.exists),
            Err(e) => {
                log::warn!("Existence probe for {} skipped: {}", id, e);
                None
            }
        }
    }
}

/// The per-item steps run for a task.
#[async_trait]
pub trait ItemPipeline: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Run every step for `task`. An error fails the task with its message.
    async fn execute(&self, task: &SyncTask) -> Result<TaskResult>;
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    progress: u8,
    step: String,
    detail: Option<String>,
    error: Option<String>,
    result: Option<TaskResult>,
}

/// A unit of work for one [`RawItem`].
pub struct SyncTask {
    id: String,
    item: RawItem,
    state: Mutex<TaskState>,
    observer: Option<Observer>,
}

impl SyncTask {
    pub fn new(item: RawItem, observer: Option<Observer>) -> Self {
        Self {
            id: item.id.clone(),
            item,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                progress: 0,
                step: "queued".into(),
                detail: None,
                error: None,
                result: None,
            }),
            observer,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn item(&self) -> &RawItem {
        &self.item
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    pub fn progress(&self) -> u8 {
        self.state().progress
    }

    pub fn result(&self) -> Option<TaskResult> {
        self.state().result.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state();
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &TaskState) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            title: self.item.title.clone(),
            status: state.status,
            progress: state.progress,
            step: state.step.clone(),
            detail: state.detail.clone(),
            error: state.error.clone(),
            result: state.result.clone(),
        }
    }

    /// Apply `change` under the state lock, then notify outside it.
    fn update(&self, change: impl FnOnce(&mut TaskState) -> bool) -> bool {
        let snapshot = {
            let mut state = self.state();
            if !change(&mut *state) {
                return false;
            }
            self.snapshot_of(&state)
        };
        if let Some(observer) = &self.observer {
            observer(&snapshot);
        }
        true
    }

    fn transition(&self, state: &mut TaskState, next: TaskStatus) -> bool {
        if !state.status.can_transition_to(next) {
            log::debug!(
                "Task {}: ignoring transition {} -> {}",
                self.id,
                state.status,
                next
            );
            return false;
        }
        state.status = next;
        true
    }

    /// Report a step and its percent. Progress never moves backwards;
    /// reports outside `Running` are ignored.
    pub fn report(&self, step: &str, percent: u8, detail: Option<String>) {
        self.update(|state| {
            if state.status != TaskStatus::Running {
                return false;
            }
            state.progress = state.progress.max(percent.min(100));
            state.step = step.to_string();
            state.detail = detail;
            true
        });
    }

    /// `Pending -> Running`.
    pub(crate) fn begin(&self) -> bool {
        self.update(|state| {
            if !self.transition(state, TaskStatus::Running) {
                return false;
            }
            state.step = "starting".into();
            true
        })
    }

    /// `Pending -> Cancelled`. Running tasks are left alone.
    pub(crate) fn cancel(&self) -> bool {
        self.update(|state| {
            if !self.transition(state, TaskStatus::Cancelled) {
                return false;
            }
            state.step = "cancelled".into();
            true
        })
    }

    fn complete(&self, result: TaskResult) {
        self.update(|state| {
            if !self.transition(state, TaskStatus::Completed) {
                return false;
            }
            state.progress = 100;
            state.step = if result.skipped { "skipped" } else { "done" }.into();
            state.detail = result.message.clone();
            state.result = Some(result);
            true
        });
    }

    fn fail(&self, message: String) {
        self.update(|state| {
            if !self.transition(state, TaskStatus::Failed) {
                return false;
            }
            state.step = "failed".into();
            state.error = Some(message);
            true
        });
    }

    /// Run `pipeline` for this task and settle its final status.
    ///
    /// Does nothing unless the task is still `Pending`.
    pub async fn run(&self, pipeline: &dyn ItemPipeline) -> TaskStatus {
        if !self.begin() {
            return self.status();
        }
        log::debug!("Task {} started ({})", self.id, pipeline.name());
        match pipeline.execute(self).await {
            Ok(result) => {
                log::info!(
                    "Task {} completed: remote_id={:?} new={} skipped={}",
                    self.id,
                    result.remote_id,
                    result.is_new,
                    result.skipped
                );
                self.complete(result);
            }
            Err(e) => {
                log::warn!("Task {} failed: {}", self.id, e);
                self.fail(e.to_string());
            }
        }
        self.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    struct Scripted {
        steps: Vec<(&'static str, u8)>,
        outcome: std::result::Result<TaskResult, &'static str>,
    }

    #[async_trait]
    impl ItemPipeline for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, task: &SyncTask) -> Result<TaskResult> {
            for (step, percent) in &self.steps {
                task.report(step, *percent, None);
            }
            self.outcome.clone().map_err(AppError::validation)
        }
    }

    fn recorder() -> (Observer, Arc<Mutex<Vec<TaskSnapshot>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Observer = Arc::new(move |s: &TaskSnapshot| sink.lock().unwrap().push(s.clone()));
        (observer, seen)
    }

    fn item() -> RawItem {
        RawItem {
            id: "item-1".into(),
            title: "Title".into(),
            url: "https://site.example/archives/1/".into(),
            ..RawItem::default()
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (observer, seen) = recorder();
        let task = SyncTask::new(item(), Some(observer));
        let pipeline = Scripted {
            steps: vec![("probe", 5), ("detail", 20), ("late", 10), ("images", 45)],
            outcome: Ok(TaskResult::synced(Some(3), true)),
        };
        assert_eq!(task.run(&pipeline).await, TaskStatus::Completed);

        let progress: Vec<u8> = seen.lock().unwrap().iter().map(|s| s.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
        assert_eq!(task.result().unwrap().remote_id, Some(3));
    }

    #[tokio::test]
    async fn test_failure_records_message() {
        let (observer, seen) = recorder();
        let task = SyncTask::new(item(), Some(observer));
        let pipeline = Scripted {
            steps: vec![("probe", 5)],
            outcome: Err("missing title"),
        };
        assert_eq!(task.run(&pipeline).await, TaskStatus::Failed);
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.status, TaskStatus::Failed);
        assert_eq!(last.error.as_deref(), Some("Validation error: missing title"));
    }

    #[tokio::test]
    async fn test_finished_task_never_reruns() {
        let task = SyncTask::new(item(), None);
        let pipeline = Scripted {
            steps: Vec::new(),
            outcome: Ok(TaskResult::skipped(Some(1))),
        };
        task.run(&pipeline).await;
        assert!(!task.cancel());
        let again = Scripted {
            steps: Vec::new(),
            outcome: Err("should not run"),
        };
        assert_eq!(task.run(&again).await, TaskStatus::Completed);
        assert!(task.result().unwrap().skipped);
    }

    #[test]
    fn test_cancel_only_pending() {
        let task = SyncTask::new(item(), None);
        task.report("ignored", 50, None);
        assert_eq!(task.progress(), 0);
        assert!(task.cancel());
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(!task.begin());
    }
}
