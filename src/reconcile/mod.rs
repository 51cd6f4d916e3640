//! Completion reconciler
//!
//! Once every step of a task is complete, fetch the final status and, when
//! the task produced a pull request, its change-set statistics. Failures are
//! soft: the task stays "complete, details pending" and is never marked failed.

use crate::api::{ApiError, TaskBackend};
use crate::progress::ProgressStore;
use crate::tasks::{FinalDetails, TaskBook};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("Task {0} is not registered")]
    UnknownTask(String),

    #[error("Task {0} was already reconciled or is not complete")]
    AlreadyReconciled(String),

    #[error("Status fetch failed for task {task_id}: {source}")]
    StatusFetch { task_id: String, source: ApiError },

    #[error("Pull request fetch failed for task {task_id}: {source}")]
    DetailFetch { task_id: String, source: ApiError },

    /// The task was evicted or re-registered while the fetch was in flight
    #[error("Result for task {0} arrived after the task was evicted or replaced")]
    Stale(String),
}

pub struct CompletionReconciler {
    backend: Arc<dyn TaskBackend>,
    store: Arc<ProgressStore>,
    book: Arc<TaskBook>,
}

impl CompletionReconciler {
    pub fn new(backend: Arc<dyn TaskBackend>, store: Arc<ProgressStore>, book: Arc<TaskBook>) -> Self {
        Self {
            backend,
            store,
            book,
        }
    }

    /// Fetch and merge the final details of a completed task.
    ///
    /// Runs at most once per registered task: the book hands out a single
    /// claim, and later calls fail with [`ReconcileError::AlreadyReconciled`].
    pub async fn reconcile(&self, task_id: &str) -> Result<FinalDetails, ReconcileError> {
        let Some(generation) = self.book.claim_reconcile(task_id) else {
            return Err(if self.book.get(task_id).is_some() {
                ReconcileError::AlreadyReconciled(task_id.to_string())
            } else {
                ReconcileError::UnknownTask(task_id.to_string())
            });
        };

        let status = self.backend.fetch_status(task_id).await.map_err(|source| {
            warn!("Status fetch for task {} failed: {}", task_id, source);
            ReconcileError::StatusFetch {
                task_id: task_id.to_string(),
                source,
            }
        })?;

        let pull_request = match status.pr_url.as_deref() {
            Some(pr_url) => {
                debug!("Task {} produced {}", task_id, pr_url);
                let details = self.backend.fetch_pull_request(pr_url).await.map_err(|source| {
                    warn!("Pull request fetch for task {} failed: {}", task_id, source);
                    ReconcileError::DetailFetch {
                        task_id: task_id.to_string(),
                        source,
                    }
                })?;
                Some(details)
            }
            None => None,
        };

        let details = FinalDetails {
            issue_number: status.issue_number,
            pull_request,
        };

        // Merge only while the task is still in the progress store
        let merged = self
            .store
            .while_tracked(task_id, || {
                self.book
                    .merge_details(task_id, generation, details.clone())
            })
            .unwrap_or(false);
        if !merged {
            debug!("Discarding stale details for task {}", task_id);
            return Err(ReconcileError::Stale(task_id.to_string()));
        }

        info!(
            "Task {} reconciled (issue: {:?}, pull request: {})",
            task_id,
            details.issue_number,
            details.pull_request.is_some()
        );
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        CreateTaskRequest, CreatedTask, PlanStep, PullRequestDetails, StepPlan,
        TaskStatusResponse,
    };
    use crate::tasks::TaskState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeBackend {
        status: Mutex<Option<Result<TaskStatusResponse, ApiError>>>,
        pull_request: Mutex<Option<Result<PullRequestDetails, ApiError>>>,
        detail_calls: AtomicUsize,
        status_gate: Option<Arc<Notify>>,
    }

    impl FakeBackend {
        fn with_status(status: Result<TaskStatusResponse, ApiError>) -> Self {
            let fake = Self::default();
            *fake.status.lock().unwrap() = Some(status);
            fake
        }
    }

    #[async_trait]
    impl TaskBackend for FakeBackend {
        async fn fetch_plan(&self, task_id: &str) -> Result<StepPlan, ApiError> {
            Err(ApiError::Status {
                status: 404,
                body: task_id.to_string(),
            })
        }

        async fn fetch_status(&self, _task_id: &str) -> Result<TaskStatusResponse, ApiError> {
            if let Some(gate) = &self.status_gate {
                gate.notified().await;
            }
            self.status
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(TaskStatusResponse::default()))
        }

        async fn fetch_pull_request(&self, pr_url: &str) -> Result<PullRequestDetails, ApiError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            self.pull_request
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(ApiError::Request(format!("no fixture for {}", pr_url))))
        }

        async fn check_health(&self) -> Result<(), ApiError> {
            Ok(())
        }

        async fn create_task(&self, _request: &CreateTaskRequest) -> Result<CreatedTask, ApiError> {
            Err(ApiError::Request("unsupported".into()))
        }

        async fn delete_task(&self, _task_id: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    /// Task tracked in the store and marked complete in the book
    fn completed_task(task_id: &str) -> (Arc<ProgressStore>, Arc<TaskBook>) {
        let store = Arc::new(ProgressStore::new());
        store
            .initialize(&StepPlan {
                task_id: task_id.to_string(),
                steps: vec![PlanStep {
                    step_id: "a".into(),
                    phase: "completion".into(),
                    step: "cleanup".into(),
                    agent_context: None,
                    step_order: 1,
                    description: None,
                }],
                total_steps: 1,
                estimated_duration_seconds: None,
            })
            .unwrap();

        let book = Arc::new(TaskBook::new());
        book.register(task_id);
        book.mark_complete(task_id);
        (store, book)
    }

    fn sample_pr() -> PullRequestDetails {
        PullRequestDetails {
            title: "Fix login redirect".into(),
            branch: "agent/fix-login".into(),
            files_changed: 3,
            additions: 42,
            deletions: 7,
            merged: false,
            state: Some("open".into()),
            url: "https://github.com/acme/web/pull/12".into(),
        }
    }

    #[tokio::test]
    async fn test_issue_number_only_skips_detail_fetch() {
        let backend = Arc::new(FakeBackend::with_status(Ok(TaskStatusResponse {
            status: Some("completed".into()),
            pr_url: None,
            issue_number: Some(42),
        })));
        let (store, book) = completed_task("t1");
        let reconciler = CompletionReconciler::new(backend.clone(), store.clone(), book.clone());

        let details = reconciler.reconcile("t1").await.unwrap();
        assert_eq!(details.issue_number, Some(42));
        assert!(details.pull_request.is_none());
        assert_eq!(backend.detail_calls.load(Ordering::SeqCst), 0);

        let record = book.get("t1").unwrap();
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.issue_number, Some(42));
        assert!(record.pull_request.is_none());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_pull_request_fetched_once() {
        let backend = Arc::new(FakeBackend::with_status(Ok(TaskStatusResponse {
            status: Some("completed".into()),
            pr_url: Some("https://github.com/acme/web/pull/12".into()),
            issue_number: Some(11),
        })));
        *backend.pull_request.lock().unwrap() = Some(Ok(sample_pr()));
        let (store, book) = completed_task("t1");
        let reconciler = CompletionReconciler::new(backend.clone(), store.clone(), book.clone());

        let details = reconciler.reconcile("t1").await.unwrap();
        assert_eq!(details.pull_request, Some(sample_pr()));

        let again = reconciler.reconcile("t1").await;
        assert_eq!(again, Err(ReconcileError::AlreadyReconciled("t1".into())));
        assert_eq!(backend.detail_calls.load(Ordering::SeqCst), 1);
        assert_eq!(book.get("t1").unwrap().pull_request, Some(sample_pr()));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_details_pending() {
        let backend = Arc::new(FakeBackend::with_status(Err(ApiError::Timeout(
            std::time::Duration::from_secs(10),
        ))));
        let (store, book) = completed_task("t1");
        let reconciler = CompletionReconciler::new(backend, store.clone(), book.clone());

        let result = reconciler.reconcile("t1").await;
        assert!(matches!(result, Err(ReconcileError::StatusFetch { .. })));
        assert_eq!(
            book.get("t1").unwrap().state,
            TaskState::CompletePendingDetails
        );
    }

    #[tokio::test]
    async fn test_detail_failure_leaves_details_pending() {
        let backend = Arc::new(FakeBackend::with_status(Ok(TaskStatusResponse {
            status: None,
            pr_url: Some("https://github.com/acme/web/pull/12".into()),
            issue_number: Some(11),
        })));
        let (store, book) = completed_task("t1");
        let reconciler = CompletionReconciler::new(backend, store.clone(), book.clone());

        let result = reconciler.reconcile("t1").await;
        assert!(matches!(result, Err(ReconcileError::DetailFetch { .. })));
        let record = book.get("t1").unwrap();
        assert_eq!(record.state, TaskState::CompletePendingDetails);
        assert!(record.issue_number.is_none());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let backend = Arc::new(FakeBackend::default());
        let reconciler = CompletionReconciler::new(
            backend,
            Arc::new(ProgressStore::new()),
            Arc::new(TaskBook::new()),
        );
        assert_eq!(
            reconciler.reconcile("ghost").await,
            Err(ReconcileError::UnknownTask("ghost".into()))
        );
    }

    #[tokio::test]
    async fn test_eviction_during_fetch_discards_result() {
        let gate = Arc::new(Notify::new());
        let mut fake = FakeBackend::with_status(Ok(TaskStatusResponse {
            status: None,
            pr_url: None,
            issue_number: Some(5),
        }));
        fake.status_gate = Some(gate.clone());
        let (store, book) = completed_task("t1");
        let reconciler = Arc::new(CompletionReconciler::new(
            Arc::new(fake),
            store.clone(),
            book.clone(),
        ));

        let pending = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reconcile("t1").await })
        };
        tokio::task::yield_now().await;

        book.evict("t1");
        gate.notify_one();

        let result = pending.await.unwrap();
        assert_eq!(result, Err(ReconcileError::Stale("t1".into())));
        assert!(book.get("t1").is_none());
    }

    #[tokio::test]
    async fn test_store_eviction_during_fetch_discards_result() {
        let gate = Arc::new(Notify::new());
        let mut fake = FakeBackend::with_status(Ok(TaskStatusResponse {
            status: None,
            pr_url: None,
            issue_number: Some(5),
        }));
        fake.status_gate = Some(gate.clone());
        let (store, book) = completed_task("t1");
        let reconciler = Arc::new(CompletionReconciler::new(
            Arc::new(fake),
            store.clone(),
            book.clone(),
        ));

        let pending = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reconcile("t1").await })
        };
        tokio::task::yield_now().await;

        // Only the progress entry goes away; the book still knows the task
        store.evict("t1");
        gate.notify_one();

        let result = pending.await.unwrap();
        assert_eq!(result, Err(ReconcileError::Stale("t1".into())));
        let record = book.get("t1").unwrap();
        assert_eq!(record.state, TaskState::CompletePendingDetails);
        assert!(record.issue_number.is_none());
    }
}
