// src/pipeline/queue.rs

//! Bounded-concurrency task queue.
//!
//! `start` runs `max_concurrent` workers on the current task. Each worker
//! claims the earliest pending task, runs it to a terminal state and loops
//! until nothing is pending. Task failures are recorded on the task and
//! never surface as queue errors.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::Notify;

use crate::models::{QueueStats, RawItem, TaskStatus};
use crate::pipeline::task::{ItemPipeline, Observer, SyncTask};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TaskQueue {
    pipeline: Arc<dyn ItemPipeline>,
    max_concurrent: usize,
    observer: Option<Observer>,
    tasks: Mutex<Vec<Arc<SyncTask>>>,
    pending: Mutex<VecDeque<Arc<SyncTask>>>,
    running: AtomicUsize,
    idle: Notify,
}

impl TaskQueue {
    pub fn new(pipeline: Arc<dyn ItemPipeline>, max_concurrent: usize) -> Self {
        Self {
            pipeline,
            max_concurrent: max_concurrent.max(1),
            observer: None,
            tasks: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            running: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Register an observer handed to every task added afterwards.
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Create one pending task per item, in order. Does not start them.
    pub fn add_tasks(&self, items: Vec<RawItem>) -> Vec<Arc<SyncTask>> {
        let created: Vec<Arc<SyncTask>> = items
            .into_iter()
            .map(|item| Arc::new(SyncTask::new(item, self.observer.clone())))
            .collect();
        lock(&self.tasks).extend(created.iter().cloned());
        lock(&self.pending).extend(created.iter().cloned());
        log::debug!("Queued {} tasks", created.len());
        created
    }

    /// Run every pending task and return once the queue has drained.
    pub async fn start(&self) -> QueueStats {
        let workers = (0..self.max_concurrent).map(|n| self.worker(n));
        join_all(workers).await;

        // Another `start` call may still be running tasks it claimed.
        loop {
            let notified = self.idle.notified();
            if self.running.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        let stats = self.stats();
        log::info!(
            "Queue drained: {} total, {} completed, {} failed, {} cancelled",
            stats.total,
            stats.completed,
            stats.failed,
            stats.cancelled
        );
        stats
    }

    async fn worker(&self, n: usize) {
        loop {
            let Some(task) = self.claim() else { break };
            task.run(self.pipeline.as_ref()).await;
            if self.running.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.idle.notify_waiters();
            }
        }
        log::debug!("Worker {} idle", n);
    }

    /// Pop the earliest task still pending and count it as running.
    fn claim(&self) -> Option<Arc<SyncTask>> {
        let mut pending = lock(&self.pending);
        while let Some(task) = pending.pop_front() {
            if task.status() == TaskStatus::Pending {
                self.running.fetch_add(1, Ordering::SeqCst);
                return Some(task);
            }
        }
        None
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for task in lock(&self.tasks).iter() {
            stats.record(task.status());
        }
        stats
    }

    /// Cancel every task that has not started. Running tasks finish.
    pub fn stop(&self) -> usize {
        let pending: Vec<Arc<SyncTask>> = lock(&self.pending).drain(..).collect();
        let cancelled = pending.iter().filter(|task| task.cancel()).count();
        if cancelled > 0 {
            log::info!("Cancelled {} pending tasks", cancelled);
        }
        cancelled
    }

    /// Forget every task.
    pub fn clear(&self) {
        lock(&self.pending).clear();
        lock(&self.tasks).clear();
    }

    pub fn get_task(&self, id: &str) -> Option<Arc<SyncTask>> {
        lock(&self.tasks).iter().find(|t| t.id() == id).cloned()
    }

    pub fn tasks(&self) -> Vec<Arc<SyncTask>> {
        lock(&self.tasks).clone()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{AppError, Result};
    use crate::models::TaskResult;

    #[derive(Default)]
    struct Sleepy {
        active: AtomicUsize,
        peak: AtomicUsize,
        order: Mutex<Vec<String>>,
        queue: Mutex<Option<Arc<TaskQueue>>>,
    }

    #[async_trait]
    impl ItemPipeline for Sleepy {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        async fn execute(&self, task: &SyncTask) -> Result<TaskResult> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.order.lock().unwrap().push(task.id().to_string());
            let stop_queue = task.id() == "stop";
            if stop_queue {
                let queue = self.queue.lock().unwrap().clone();
                if let Some(queue) = queue {
                    queue.stop();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if task.id().starts_with("bad") {
                return Err(AppError::validation("bad item"));
            }
            Ok(TaskResult::synced(Some(1), true))
        }
    }

    fn items(ids: &[&str]) -> Vec<RawItem> {
        ids.iter()
            .map(|id| RawItem {
                id: id.to_string(),
                url: format!("https://site.example/{id}"),
                ..RawItem::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_drains_with_bounded_concurrency() {
        let pipeline = Arc::new(Sleepy::default());
        let queue = TaskQueue::new(pipeline.clone(), 2);
        queue.add_tasks(items(&["a", "bad-b", "c", "d", "e"]));
        assert_eq!(queue.stats().pending, 5);

        let stats = queue.start().await;
        assert_eq!(stats.total, 5);
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(queue.running(), 0);
        assert!(pipeline.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pipeline.order.lock().unwrap()[..2], ["a", "bad-b"]);
        assert!(queue.get_task("bad-b").unwrap().error().is_some());
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_only() {
        let pipeline = Arc::new(Sleepy::default());
        let queue = Arc::new(TaskQueue::new(pipeline.clone(), 1));
        *pipeline.queue.lock().unwrap() = Some(queue.clone());
        queue.add_tasks(items(&["stop", "x", "y"]));

        let stats = queue.start().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 2);
        assert_eq!(
            queue.get_task("x").unwrap().status(),
            TaskStatus::Cancelled
        );
        *pipeline.queue.lock().unwrap() = None;
    }

    #[tokio::test]
    async fn test_start_on_empty_queue_and_clear() {
        let queue = TaskQueue::new(Arc::new(Sleepy::default()), 3);
        assert_eq!(queue.start().await, QueueStats::default());

        queue.add_tasks(items(&["a"]));
        queue.clear();
        assert!(queue.tasks().is_empty());
        assert_eq!(queue.start().await.total, 0);
    }

    #[tokio::test]
    async fn test_observer_sees_every_task() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let queue = TaskQueue::new(Arc::new(Sleepy::default()), 2).with_observer(Arc::new(
            move |s: &crate::models::TaskSnapshot| {
                if s.status.is_terminal() {
                    sink.lock().unwrap().push(s.id.clone());
                }
            },
        ));
        queue.add_tasks(items(&["a", "b", "c"]));
        queue.start().await;
        let mut done = seen.lock().unwrap().clone();
        done.sort();
        assert_eq!(done, ["a", "b", "c"]);
    }
}
