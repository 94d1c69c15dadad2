// src/models/task.rs

//! Task lifecycle types shared by the queue, tasks and observers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a sync task.
///
/// `Pending -> Running -> {Completed, Failed}` or `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskResult {
    /// Backend id of the record
    pub remote_id: Option<u64>,
    /// Whether the backend created a new record
    pub is_new: bool,
    /// The record already existed, nothing was uploaded
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskResult {
    pub fn skipped(remote_id: Option<u64>) -> Self {
        Self {
            remote_id,
            skipped: true,
            ..Self::default()
        }
    }

    pub fn synced(remote_id: Option<u64>, is_new: bool) -> Self {
        Self {
            remote_id,
            is_new,
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Point-in-time view of a task, emitted to observers on every change.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub step: String,
    /// Free-form detail for the current step, e.g. `3/7`
    pub detail: Option<String>,
    pub error: Option<String>,
    pub result: Option<TaskResult>,
}

/// Aggregate counts over a queue's tasks.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    pub fn record(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_stats_record() {
        let mut stats = QueueStats::default();
        for s in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Pending,
            TaskStatus::Completed,
        ] {
            stats.record(s);
        }
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.finished(), 3);
    }
}
