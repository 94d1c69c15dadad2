// src/pipeline/locks.rs

//! Per-source-id sync locks.
//!
//! Only one task at a time runs the relay and sync steps for a given id.
//! A task that waited on another reads the outcome the first one settled
//! and returns it instead of syncing again. Failed runs settle nothing, so
//! the next holder retries. An id's entry is dropped from the table once
//! no task holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as SlotMutex, OwnedMutexGuard};

use crate::models::TaskResult;

type Slot = Arc<SlotMutex<Option<TaskResult>>>;
type Slots = Arc<Mutex<HashMap<u64, Slot>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<u64, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lock table keyed by upstream id.
#[derive(Default)]
pub struct SyncLocks {
    slots: Slots,
}

/// Exclusive hold on one id.
pub struct SyncGuard {
    id: u64,
    slot: Option<OwnedMutexGuard<Option<TaskResult>>>,
    slots: Slots,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `id`, waiting while another task holds it.
    pub async fn acquire(&self, id: u64) -> SyncGuard {
        let slot = lock(&self.slots).entry(id).or_default().clone();
        let slot = slot.lock_owned().await;
        SyncGuard {
            id,
            slot: Some(slot),
            slots: self.slots.clone(),
        }
    }

    /// Ids currently held or waited on.
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SyncGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Outcome recorded by an earlier holder.
    pub fn settled(&self) -> Option<&TaskResult> {
        self.slot.as_ref().and_then(|slot| slot.as_ref())
    }

    /// Record the outcome for later holders of the same id.
    pub fn settle(&mut self, result: TaskResult) {
        if let Some(slot) = self.slot.as_mut() {
            **slot = Some(result);
        }
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        drop(self.slot.take());
        // Acquirers clone under the table lock, so the count is stable here.
        let mut slots = lock(&self.slots);
        if slots
            .get(&self.id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.id);
        }
    }
}
