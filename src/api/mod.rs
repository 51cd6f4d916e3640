//! Backend boundary
//!
//! Request/response contract with the task backend. Everything above this
//! module talks to [`TaskBackend`], so tests can swap in a fake and the
//! real [`ApiClient`] stays a thin `reqwest` wrapper.

mod client;
pub mod models;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use client::ApiClient;
pub use models::{
    AgentContext, ChannelMessage, CreateTaskRequest, CreatedTask, ErrorEvent, PlanStep,
    ProgressEvent, ProgressStatus, PullRequestDetails, StepPlan, TaskStatusResponse,
};

/// Errors at the HTTP boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Request/response operations the client core needs from the backend
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Fetch the fixed step plan of a task
    async fn fetch_plan(&self, task_id: &str) -> Result<StepPlan, ApiError>;

    /// Fetch the execution status of a task
    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatusResponse, ApiError>;

    /// Fetch change-set statistics for a pull request URL
    async fn fetch_pull_request(&self, pr_url: &str) -> Result<PullRequestDetails, ApiError>;

    /// Liveness check; `Ok` only for a success response
    async fn check_health(&self) -> Result<(), ApiError>;

    async fn create_task(&self, request: &CreateTaskRequest) -> Result<CreatedTask, ApiError>;

    async fn delete_task(&self, task_id: &str) -> Result<(), ApiError>;
}
