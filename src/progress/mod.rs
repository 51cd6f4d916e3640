//! Task progress tracking
//!
//! - [`catalog`] - phase/step tags to display names
//! - [`model`] - steps, phases and the per-task aggregate
//! - [`store`] - per-task state keyed by task id

pub mod catalog;
pub mod model;
pub mod store;

use thiserror::Error;

pub use catalog::{MappingError, PhaseKey, StepDisplay};
pub use model::{PhaseGroup, StepRecord, StepStatus, StepTransition, TaskProgress};
pub use store::ProgressStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    #[error("Plan for task {0} has no steps")]
    PlanEmpty(String),

    #[error("Step {step_id} is not part of the plan for task {task_id}")]
    StepNotFound { task_id: String, step_id: String },

    #[error("Step {step_id} appears twice in the plan for task {task_id}")]
    DuplicateStep { task_id: String, step_id: String },

    #[error("No progress tracked for task {0}")]
    TaskNotFound(String),

    #[error("Cannot describe step {step_id}: {source}")]
    Mapping {
        step_id: String,
        source: MappingError,
    },
}
