//! Tests de integración del tracker
//!
//! Backend falso en memoria + servidor websocket local en 127.0.0.1:0

use agentdock::api::{
    ApiError, CreateTaskRequest, CreatedTask, PlanStep, PullRequestDetails, StepPlan,
    TaskBackend, TaskStatusResponse,
};
use agentdock::config::RealtimeConfig;
use agentdock::realtime::RealtimeChannel;
use agentdock::tasks::TaskState;
use agentdock::tracker::{TaskTracker, TrackerError, TrackerEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const PR_URL: &str = "https://github.com/acme/web/pull/12";

#[derive(Default)]
struct FakeBackend {
    status: Mutex<TaskStatusResponse>,
    detail_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    fail_plan: bool,
}

fn plan_step(id: &str, phase: &str, tag: &str, order: i64) -> PlanStep {
    PlanStep {
        step_id: id.to_string(),
        phase: phase.to_string(),
        step: tag.to_string(),
        agent_context: None,
        step_order: order,
        description: None,
    }
}

fn sample_pr() -> PullRequestDetails {
    PullRequestDetails {
        title: "Fix login redirect".into(),
        branch: "agent/fix-login".into(),
        files_changed: 2,
        additions: 10,
        deletions: 1,
        merged: false,
        state: Some("open".into()),
        url: PR_URL.into(),
    }
}

#[async_trait]
impl TaskBackend for FakeBackend {
    async fn fetch_plan(&self, task_id: &str) -> Result<StepPlan, ApiError> {
        if self.fail_plan {
            return Err(ApiError::Status {
                status: 404,
                body: "no such task".into(),
            });
        }
        Ok(StepPlan {
            task_id: task_id.to_string(),
            steps: vec![
                plan_step("a", "initialization", "clone_repository", 1),
                plan_step("b", "completion", "create_pull_request", 2),
            ],
            total_steps: 2,
            estimated_duration_seconds: Some(120),
        })
    }

    async fn fetch_status(&self, _task_id: &str) -> Result<TaskStatusResponse, ApiError> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn fetch_pull_request(&self, pr_url: &str) -> Result<PullRequestDetails, ApiError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(pr_url, PR_URL);
        Ok(sample_pr())
    }

    async fn check_health(&self) -> Result<(), ApiError> {
        Ok(())
    }

    async fn create_task(&self, request: &CreateTaskRequest) -> Result<CreatedTask, ApiError> {
        Ok(CreatedTask {
            task_id: format!("task-{}", request.issue_number.unwrap_or_default()),
        })
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), ApiError> {
        self.deleted.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

fn fast_config() -> RealtimeConfig {
    RealtimeConfig {
        initial_delay_ms: 10,
        max_delay_ms: 40,
        max_attempts: 3,
        connect_timeout_secs: 2,
    }
}

fn progress_frame(task_id: &str, step_id: &str, status: &str) -> Message {
    Message::Text(format!(
        r#"{{"type":"progress","taskId":"{}","stepId":"{}","status":"{}","phase":"initialization","step":"clone_repository","timestamp":"2026-03-01T10:00:00Z"}}"#,
        task_id, step_id, status
    ))
}

/// Servidor que envía `frames` y espera a que el cliente cierre
async fn serve_frames(frames: Vec<Message>) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for frame in frames {
            ws.send(frame).await.unwrap();
        }
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });
    (url, handle)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_task_runs_to_completion_with_pull_request() {
    let backend = Arc::new(FakeBackend::default());
    *backend.status.lock().unwrap() = TaskStatusResponse {
        status: Some("completed".into()),
        pr_url: Some(PR_URL.into()),
        issue_number: Some(42),
    };

    let (url, server) = serve_frames(vec![
        progress_frame("t1", "a", "in_progress"),
        progress_frame("t1", "a", "completed"),
        progress_frame("t1", "b", "completed"),
    ])
    .await;
    let channel = RealtimeChannel::new(&url, fast_config()).unwrap();
    let tracker = TaskTracker::new(backend.clone(), channel);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let record = tokio::time::timeout(Duration::from_secs(10), tracker.watch("t1", tx))
        .await
        .expect("watch did not finish")
        .unwrap()
        .expect("task record missing");

    assert_eq!(record.state, TaskState::Completed);
    assert_eq!(record.issue_number, Some(42));
    assert_eq!(record.pull_request, Some(sample_pr()));
    assert_eq!(backend.detail_calls.load(Ordering::SeqCst), 1);

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(TrackerEvent::Snapshot(p)) if p.completed_steps == 0));
    assert!(events
        .iter()
        .any(|e| matches!(e, TrackerEvent::Snapshot(p) if p.percentage() == 100)));
    assert!(events
        .iter()
        .any(|e| matches!(e, TrackerEvent::Completed(r) if r.issue_number == Some(42))));
    assert_eq!(events.last(), Some(&TrackerEvent::Closed));

    let progress = tracker.store().get("t1").unwrap();
    assert!(progress.is_complete());
    assert_eq!(progress.recount(), (2, 0));
    server.await.unwrap();
}

#[tokio::test]
async fn test_error_frame_marks_task_failed() {
    let backend = Arc::new(FakeBackend::default());
    let (url, server) = serve_frames(vec![
        progress_frame("t1", "a", "completed"),
        Message::Text(r#"{"type":"error","taskId":"t1","errorMessage":"agent crashed"}"#.into()),
    ])
    .await;
    let tracker = TaskTracker::new(backend, RealtimeChannel::new(&url, fast_config()).unwrap());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let record = tracker.watch("t1", tx).await.unwrap().unwrap();

    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.error.as_deref(), Some("agent crashed"));
    let events = drain(&mut rx);
    assert!(events.contains(&TrackerEvent::Failed("agent crashed".into())));
    assert!(!events
        .iter()
        .any(|e| matches!(e, TrackerEvent::Completed(_))));

    // Progress shown so far is kept
    assert_eq!(tracker.store().get("t1").unwrap().completed_steps, 1);
    server.await.unwrap();
}

#[tokio::test]
async fn test_events_for_other_tasks_are_ignored() {
    let backend = Arc::new(FakeBackend::default());
    let (url, server) = serve_frames(vec![
        progress_frame("other", "a", "completed"),
        progress_frame("other", "b", "completed"),
        Message::Text(r#"{"type":"error","taskId":"other","errorMessage":"boom"}"#.into()),
        progress_frame("t1", "missing", "completed"),
        progress_frame("t1", "a", "in_progress"),
        Message::Text(r#"{"type":"error","taskId":"t1","errorMessage":"stop"}"#.into()),
    ])
    .await;
    let tracker = TaskTracker::new(backend, RealtimeChannel::new(&url, fast_config()).unwrap());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let record = tracker.watch("t1", tx).await.unwrap().unwrap();

    // The error for "other" did not fail t1; only its own error did
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.error.as_deref(), Some("stop"));

    let events = drain(&mut rx);
    let snapshots: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TrackerEvent::Snapshot(progress) => Some(progress),
            _ => None,
        })
        .collect();
    // Initial snapshot plus the single t1 update that applied
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().all(|p| p.task_id == "t1"));
    assert_eq!(snapshots[1].current_step_id.as_deref(), Some("a"));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, TrackerEvent::Failed(_)))
            .collect::<Vec<_>>(),
        vec![&TrackerEvent::Failed("stop".into())]
    );

    let progress = tracker.store().get("t1").unwrap();
    assert_eq!(progress.completed_steps, 0);
    assert_eq!(progress.failed_steps, 0);
    assert_eq!(progress.current_step_id.as_deref(), Some("a"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_channel_fails_after_retries() {
    // Bind and drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let tracker = TaskTracker::new(
        Arc::new(FakeBackend::default()),
        RealtimeChannel::new(&url, fast_config()).unwrap(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let record = tracker.watch("t1", tx).await.unwrap().unwrap();

    assert_eq!(record.state, TaskState::Failed);
    let reconnects = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, TrackerEvent::Reconnecting { .. }))
        .count();
    assert_eq!(reconnects, 3);
}

#[tokio::test]
async fn test_plan_failure_is_reported() {
    let backend = Arc::new(FakeBackend {
        fail_plan: true,
        ..Default::default()
    });
    let tracker = TaskTracker::new(
        backend,
        RealtimeChannel::new("ws://127.0.0.1:9", fast_config()).unwrap(),
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = tracker.watch("t1", tx).await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Api(ApiError::Status { status: 404, .. })
    ));
    assert!(!tracker.store().contains("t1"));
}

#[tokio::test]
async fn test_launch_and_delete() {
    let backend = Arc::new(FakeBackend::default());
    let (url, server) = serve_frames(vec![progress_frame("task-7", "a", "completed")]).await;
    let tracker = Arc::new(TaskTracker::new(
        backend.clone(),
        RealtimeChannel::new(&url, fast_config()).unwrap(),
    ));

    let task_id = tracker
        .launch(&CreateTaskRequest {
            repository: "acme/web".into(),
            issue_number: Some(7),
            pull_request_number: None,
            agents: vec![agentdock::api::AgentContext::new("claude")],
        })
        .await
        .unwrap();
    assert_eq!(task_id, "task-7");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = {
        let tracker = tracker.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move { tracker.watch(&task_id, tx).await })
    };

    // Wait until the first event has been applied
    loop {
        match rx.recv().await {
            Some(TrackerEvent::Snapshot(p)) if p.completed_steps == 1 => break,
            Some(_) => continue,
            None => panic!("watch ended early"),
        }
    }

    tracker.delete(&task_id).await.unwrap();
    let record = watcher.await.unwrap().unwrap();

    assert!(record.is_none(), "deleted task has no record");
    assert!(!tracker.store().contains(&task_id));
    assert!(tracker.book().get(&task_id).is_none());
    assert_eq!(*backend.deleted.lock().unwrap(), vec![task_id]);
    server.await.unwrap();
}
