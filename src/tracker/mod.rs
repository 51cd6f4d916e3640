//! Task tracker
//!
//! Drives one task end to end: fetch the plan, track it in the
//! [`ProgressStore`], stream realtime events into it, and reconcile the final
//! details once every step is complete. Consumers get [`TrackerEvent`]s.

use crate::api::{ApiClient, ApiError, CreateTaskRequest, TaskBackend};
use crate::config::AppConfig;
use crate::progress::{ProgressError, ProgressStore, TaskProgress};
use crate::realtime::{ChannelError, ChannelEvent, CloseReason, RealtimeChannel};
use crate::reconcile::{CompletionReconciler, ReconcileError};
use crate::tasks::{TaskBook, TaskRecord};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a watcher reports while a task runs
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// Progress after initialization and after every applied event
    Snapshot(TaskProgress),
    Reconnecting { attempt: u32, delay: Duration },
    /// The task failed with the carried message
    Failed(String),
    /// All steps done and final details merged
    Completed(TaskRecord),
    /// All steps done, but the details could not be fetched
    DetailsPending(String),
    Closed,
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

pub struct TaskTracker {
    backend: Arc<dyn TaskBackend>,
    store: Arc<ProgressStore>,
    book: Arc<TaskBook>,
    channel: RealtimeChannel,
    reconciler: CompletionReconciler,
}

impl TaskTracker {
    pub fn new(backend: Arc<dyn TaskBackend>, channel: RealtimeChannel) -> Self {
        let store = Arc::new(ProgressStore::new());
        let book = Arc::new(TaskBook::new());
        Self {
            reconciler: CompletionReconciler::new(backend.clone(), store.clone(), book.clone()),
            backend,
            store,
            book,
            channel,
        }
    }

    /// Build the HTTP client and realtime channel from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, TrackerError> {
        let backend = ApiClient::new(&config.api_url, config.request_timeout())?;
        let channel = RealtimeChannel::new(&config.ws_url, config.realtime.clone())?;
        Ok(Self::new(Arc::new(backend), channel))
    }

    pub fn backend(&self) -> Arc<dyn TaskBackend> {
        self.backend.clone()
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn book(&self) -> &TaskBook {
        &self.book
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    /// Create a task on the backend and return its id
    pub async fn launch(&self, request: &CreateTaskRequest) -> Result<String, TrackerError> {
        let created = self.backend.create_task(request).await?;
        info!(
            "Launched task {} on {} with {} agent(s)",
            created.task_id,
            request.repository,
            request.agents.len()
        );
        Ok(created.task_id)
    }

    /// Watch a task until its channel closes.
    ///
    /// Returns the final task record, or `None` if the task was deleted
    /// while being watched.
    pub async fn watch(
        &self,
        task_id: &str,
        events: mpsc::UnboundedSender<TrackerEvent>,
    ) -> Result<Option<TaskRecord>, TrackerError> {
        let plan = self.backend.fetch_plan(task_id).await?;
        let snapshot = self.store.initialize(&plan)?;
        self.book.register(task_id);
        let _ = events.send(TrackerEvent::Snapshot(snapshot));

        let mut stream = self.channel.connect(task_id).await?;
        while let Some(event) = stream.recv().await {
            match event {
                ChannelEvent::Open => debug!("Channel open for task {}", task_id),
                ChannelEvent::Progress(progress) => {
                    if progress.task_id != task_id {
                        debug!(
                            "Ignoring event for task {} on channel of {}",
                            progress.task_id, task_id
                        );
                        continue;
                    }
                    // Unknown steps are logged by the store and dropped
                    let Ok(snapshot) = self.store.apply(&progress) else {
                        continue;
                    };
                    let complete = snapshot.is_complete();
                    let _ = events.send(TrackerEvent::Snapshot(snapshot));

                    if complete && self.book.mark_complete(task_id) {
                        self.finish(task_id, &events).await;
                        self.channel.disconnect().await;
                    }
                }
                ChannelEvent::Error {
                    task_id: Some(other),
                    message,
                } if other != task_id => {
                    debug!(
                        "Ignoring error for task {} on channel of {}: {}",
                        other, task_id, message
                    );
                }
                ChannelEvent::Error { message, .. } => {
                    warn!("Task {} reported an error: {}", task_id, message);
                    if self.book.mark_failed(task_id, message.clone()) {
                        let _ = events.send(TrackerEvent::Failed(message));
                    }
                    self.channel.disconnect().await;
                }
                ChannelEvent::Reconnecting { attempt, delay } => {
                    let _ = events.send(TrackerEvent::Reconnecting { attempt, delay });
                }
                ChannelEvent::Closed(reason) => {
                    if let CloseReason::Exhausted { attempts } = reason {
                        let message = format!("Connection lost after {} attempts", attempts);
                        if self.book.mark_failed(task_id, message.clone()) {
                            let _ = events.send(TrackerEvent::Failed(message));
                        }
                    }
                    let _ = events.send(TrackerEvent::Closed);
                    break;
                }
            }
        }

        Ok(self.book.get(task_id))
    }

    async fn finish(&self, task_id: &str, events: &mpsc::UnboundedSender<TrackerEvent>) {
        match self.reconciler.reconcile(task_id).await {
            Ok(_) => {
                if let Some(record) = self.book.get(task_id) {
                    let _ = events.send(TrackerEvent::Completed(record));
                }
            }
            Err(ReconcileError::Stale(_)) => {}
            Err(e) => {
                debug!("Details pending for task {}: {}", task_id, e);
                let _ = events.send(TrackerEvent::DetailsPending(task_id.to_string()));
            }
        }
    }

    /// Delete a task on the backend and drop all local state for it
    pub async fn delete(&self, task_id: &str) -> Result<(), TrackerError> {
        self.backend.delete_task(task_id).await?;
        self.store.evict(task_id);
        self.book.evict(task_id);
        if self.channel.current_task().as_deref() == Some(task_id) {
            self.channel.disconnect().await;
        }
        info!("Deleted task {}", task_id);
        Ok(())
    }

    /// Close the channel and forget every task
    pub async fn clear(&self) {
        self.channel.disconnect().await;
        self.store.clear();
        self.book.clear();
    }
}
