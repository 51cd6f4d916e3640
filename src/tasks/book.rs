//! In-memory task book keyed by task id

use super::record::{FinalDetails, TaskRecord, TaskState};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct TaskBook {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh record for a task, replacing any previous one
    pub fn register(&self, task_id: &str) -> Uuid {
        let record = TaskRecord::new(task_id);
        let generation = record.generation;
        self.lock().insert(task_id.to_string(), record);
        generation
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.lock().get(task_id).cloned()
    }

    /// Move a running task to "complete, details pending".
    /// Returns false when the task is unknown or already past running.
    pub fn mark_complete(&self, task_id: &str) -> bool {
        let mut records = self.lock();
        match records.get_mut(task_id) {
            Some(record) if record.state == TaskState::Running => {
                record.state = TaskState::CompletePendingDetails;
                true
            }
            _ => false,
        }
    }

    /// Mark a task failed unless it already completed
    pub fn mark_failed(&self, task_id: &str, message: impl Into<String>) -> bool {
        let mut records = self.lock();
        match records.get_mut(task_id) {
            Some(record) if !record.is_finished() => {
                record.state = TaskState::Failed;
                record.error = Some(message.into());
                true
            }
            _ => false,
        }
    }

    /// Claim the single reconcile run of a completed task.
    ///
    /// Yields the generation to hand back to [`merge_details`](Self::merge_details);
    /// `None` if the task is unknown, not complete, or already claimed.
    pub fn claim_reconcile(&self, task_id: &str) -> Option<Uuid> {
        let mut records = self.lock();
        let record = records.get_mut(task_id)?;
        if record.reconcile_claimed || record.state != TaskState::CompletePendingDetails {
            return None;
        }
        record.reconcile_claimed = true;
        Some(record.generation)
    }

    /// Merge fetched details. Results for an evicted or re-registered task
    /// are discarded.
    pub fn merge_details(&self, task_id: &str, generation: Uuid, details: FinalDetails) -> bool {
        let mut records = self.lock();
        let Some(record) = records.get_mut(task_id) else {
            return false;
        };
        if record.generation != generation {
            return false;
        }

        if details.issue_number.is_some() {
            record.issue_number = details.issue_number;
        }
        if details.pull_request.is_some() {
            record.pull_request = details.pull_request;
        }
        record.state = TaskState::Completed;
        true
    }

    pub fn evict(&self, task_id: &str) -> bool {
        self.lock().remove(task_id).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
