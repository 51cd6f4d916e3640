//! Task record types

use crate::api::PullRequestDetails;
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a watched task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    /// The channel reported an error for the task
    Failed,
    /// Every step completed; final details not merged yet
    CompletePendingDetails,
    Completed,
}

/// Display-facing record of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub state: TaskState,
    pub issue_number: Option<u64>,
    pub pull_request: Option<PullRequestDetails>,
    pub error: Option<String>,
    /// Changes every time the task is (re)registered
    pub generation: Uuid,
    #[serde(skip)]
    pub(crate) reconcile_claimed: bool,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Running,
            issue_number: None,
            pull_request: None,
            error: None,
            generation: Uuid::new_v4(),
            reconcile_claimed: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TaskState::Failed | TaskState::Completed)
    }
}

/// Metadata fetched after a task completes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinalDetails {
    pub issue_number: Option<u64>,
    pub pull_request: Option<PullRequestDetails>,
}
