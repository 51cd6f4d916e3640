//! Progress store
//!
//! Owns one [`TaskProgress`] per task. Each entry sits behind its own lock,
//! so events for one task are applied one at a time while other tasks
//! proceed independently. The store is an ordinary value: whoever builds
//! the application context owns it and tears it down.

use super::model::TaskProgress;
use super::ProgressError;
use crate::api::{ProgressEvent, ProgressStatus, StepPlan};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type Entry = Arc<Mutex<TaskProgress>>;

#[derive(Debug, Default)]
pub struct ProgressStore {
    tasks: RwLock<HashMap<String, Entry>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register the aggregate for a plan, replacing any previous one
    pub fn initialize(&self, plan: &StepPlan) -> Result<TaskProgress, ProgressError> {
        let progress = TaskProgress::from_plan(plan)?;
        let snapshot = progress.clone();

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks
            .insert(plan.task_id.clone(), Arc::new(Mutex::new(progress)))
            .is_some()
        {
            tracing::debug!("Replaced progress for task {}", plan.task_id);
        }
        tracing::info!(
            "Tracking task {} ({} steps in {} phases)",
            plan.task_id,
            snapshot.total_steps,
            snapshot.phases.len()
        );

        Ok(snapshot)
    }

    /// Apply one step status change and return the updated aggregate.
    ///
    /// Unknown steps are reported and leave the state untouched.
    pub fn apply_event(
        &self,
        task_id: &str,
        step_id: &str,
        status: ProgressStatus,
        at: DateTime<Utc>,
    ) -> Result<TaskProgress, ProgressError> {
        let entry = self
            .entry(task_id)
            .ok_or_else(|| ProgressError::TaskNotFound(task_id.to_string()))?;
        let mut progress = entry.lock().unwrap_or_else(PoisonError::into_inner);

        match progress.apply(step_id, status, at) {
            Ok(transition) => {
                if transition.changed() {
                    tracing::debug!(
                        "Task {} step {}: {:?} -> {:?} ({}/{} completed, {} failed)",
                        task_id,
                        step_id,
                        transition.previous,
                        transition.current,
                        progress.completed_steps,
                        progress.total_steps,
                        progress.failed_steps
                    );
                }
                Ok(progress.clone())
            }
            Err(e) => {
                tracing::warn!("Dropping progress event: {}", e);
                Err(e)
            }
        }
    }

    /// [`apply_event`](Self::apply_event) for a realtime frame
    pub fn apply(&self, event: &ProgressEvent) -> Result<TaskProgress, ProgressError> {
        self.apply_event(&event.task_id, &event.step_id, event.status, event.timestamp)
    }

    pub fn get(&self, task_id: &str) -> Option<TaskProgress> {
        self.entry(task_id)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_id)
    }

    /// Drop all state for a task; no-op when absent
    pub fn evict(&self, task_id: &str) {
        let removed = self
            .tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        if removed.is_some() {
            tracing::debug!("Evicted progress for task {}", task_id);
        }
    }

    pub fn clear(&self) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Run `f` only if the task is tracked. Eviction of any task waits
    /// until `f` returns, so `f` never runs against an evicted task.
    pub fn while_tracked<R>(&self, task_id: &str, f: impl FnOnce() -> R) -> Option<R> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        if !tasks.contains_key(task_id) {
            return None;
        }
        Some(f())
    }

    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn entry(&self, task_id: &str) -> Option<Entry> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PlanStep;
    use crate::progress::StepStatus;

    fn plan(task_id: &str, ids: &[&str]) -> StepPlan {
        let tags = ["validate_request", "clone_repository", "analyze_issue", "prepare_workspace"];
        StepPlan {
            task_id: task_id.to_string(),
            total_steps: ids.len(),
            steps: ids
                .iter()
                .enumerate()
                .map(|(i, id)| PlanStep {
                    step_id: id.to_string(),
                    phase: "initialization".to_string(),
                    step: tags[i % tags.len()].to_string(),
                    agent_context: None,
                    step_order: i as i64,
                    description: None,
                })
                .collect(),
            estimated_duration_seconds: None,
        }
    }

    #[test]
    fn test_initialize_and_get() {
        let store = ProgressStore::new();
        let snapshot = store.initialize(&plan("t1", &["a", "b"])).unwrap();
        assert_eq!(snapshot.total_steps, 2);
        assert_eq!(store.get("t1"), Some(snapshot));
        assert!(store.get("t2").is_none());
    }

    #[test]
    fn test_empty_plan_registers_nothing() {
        let store = ProgressStore::new();
        assert!(matches!(
            store.initialize(&plan("t1", &[])),
            Err(ProgressError::PlanEmpty(_))
        ));
        assert!(!store.contains("t1"));
    }

    #[test]
    fn test_unknown_step_leaves_state_untouched() {
        let store = ProgressStore::new();
        store.initialize(&plan("t1", &["a", "b"])).unwrap();
        store
            .apply_event("t1", "a", ProgressStatus::InProgress, Utc::now())
            .unwrap();
        let before = store.get("t1").unwrap();

        let err = store
            .apply_event("t1", "zzz", ProgressStatus::Completed, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ProgressError::StepNotFound { .. }));
        assert_eq!(store.get("t1").unwrap(), before);
    }

    #[test]
    fn test_unknown_task() {
        let store = ProgressStore::new();
        let err = store
            .apply_event("nope", "a", ProgressStatus::Completed, Utc::now())
            .unwrap_err();
        assert_eq!(err, ProgressError::TaskNotFound("nope".to_string()));
    }

    #[test]
    fn test_evict_is_idempotent_and_isolated() {
        let store = ProgressStore::new();
        store.initialize(&plan("t1", &["a"])).unwrap();
        store.initialize(&plan("t2", &["a"])).unwrap();
        assert_eq!(store.task_ids(), vec!["t1".to_string(), "t2".to_string()]);

        store.evict("t1");
        store.evict("t1");
        assert!(!store.contains("t1"));

        let t2 = store
            .apply_event("t2", "a", ProgressStatus::Completed, Utc::now())
            .unwrap();
        assert_eq!(t2.completed_steps, 1);

        store.clear();
        assert!(store.task_ids().is_empty());
    }

    #[test]
    fn test_while_tracked_skips_evicted_task() {
        let store = ProgressStore::new();
        store.initialize(&plan("t1", &["a"])).unwrap();

        assert_eq!(store.while_tracked("t1", || 7), Some(7));
        store.evict("t1");

        let mut ran = false;
        assert_eq!(store.while_tracked("t1", || ran = true), None);
        assert!(!ran);
    }

    #[test]
    fn test_reinitialize_resets_progress() {
        let store = ProgressStore::new();
        store.initialize(&plan("t1", &["a"])).unwrap();
        store
            .apply_event("t1", "a", ProgressStatus::Completed, Utc::now())
            .unwrap();

        let fresh = store.initialize(&plan("t1", &["a"])).unwrap();
        assert_eq!(fresh.completed_steps, 0);
        assert_eq!(fresh.step("a").unwrap().status, StepStatus::NotStarted);
    }

    #[test]
    fn test_concurrent_events_keep_counters_exact() {
        let ids: Vec<String> = (0..40).map(|i| format!("s{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let store = Arc::new(ProgressStore::new());
        store.initialize(&plan("t1", &id_refs)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                let ids = ids.clone();
                std::thread::spawn(move || {
                    for (i, id) in ids.iter().enumerate() {
                        let status = if (i + worker) % 3 == 0 {
                            ProgressStatus::Failed
                        } else {
                            ProgressStatus::Completed
                        };
                        let _ = store.apply_event("t1", id, status, Utc::now());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let progress = store.get("t1").unwrap();
        assert_eq!(progress.recount(), (progress.completed_steps, progress.failed_steps));
        assert_eq!(progress.completed_steps + progress.failed_steps, 40);
    }
}
