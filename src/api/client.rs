//! HTTP client for the task backend

use super::models::{
    CreateTaskRequest, CreatedTask, PullRequestDetails, StepPlan, TaskStatusResponse,
};
use super::{ApiError, TaskBackend};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// `reqwest`-backed [`TaskBackend`]
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl ApiClient {
    /// Create a client rooted at `base_url`; every request is bounded by `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(ApiError::InvalidUrl(format!(
                "URL must use http:// or https:// scheme, got: {}",
                base_url.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("agentdock/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn map_send_error(&self, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            ApiError::Timeout(self.timeout)
        } else {
            ApiError::Request(error.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let response = Self::check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        tracing::debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::decode(response).await
    }
}

#[async_trait]
impl TaskBackend for ApiClient {
    async fn fetch_plan(&self, task_id: &str) -> Result<StepPlan, ApiError> {
        let url = self.endpoint(&["api", "tasks", task_id, "steps"])?;
        self.get_json(url).await
    }

    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatusResponse, ApiError> {
        let url = self.endpoint(&["api", "tasks", task_id, "status"])?;
        self.get_json(url).await
    }

    async fn fetch_pull_request(&self, pr_url: &str) -> Result<PullRequestDetails, ApiError> {
        let mut url = self.endpoint(&["api", "pull-requests"])?;
        url.query_pairs_mut().append_pair("url", pr_url);
        self.get_json(url).await
    }

    async fn check_health(&self) -> Result<(), ApiError> {
        let url = self.endpoint(&["health"])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn create_task(&self, request: &CreateTaskRequest) -> Result<CreatedTask, ApiError> {
        let url = self.endpoint(&["api", "tasks"])?;
        tracing::debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::decode(response).await
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "tasks", task_id])?;
        tracing::debug!("DELETE {}", url);
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::check_status(response).await.map(|_| ())
    }
}
