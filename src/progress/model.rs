//! Task progress data model
//!
//! A [`TaskProgress`] is built once from a step plan and afterwards only
//! mutated by status transitions of steps already in the plan.

use super::catalog::{self, PhaseKey};
use super::ProgressError;
use crate::api::{AgentContext, ProgressStatus, StepPlan};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Status of a step as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// No event observed for this step yet
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl From<ProgressStatus> for StepStatus {
    fn from(status: ProgressStatus) -> Self {
        match status {
            ProgressStatus::InProgress => Self::InProgress,
            ProgressStatus::Completed => Self::Completed,
            ProgressStatus::Failed => Self::Failed,
        }
    }
}

impl StepStatus {
    pub fn marker(&self) -> &'static str {
        match self {
            Self::NotStarted => "○",
            Self::InProgress => "◐",
            Self::Completed => "✓",
            Self::Failed => "✗",
        }
    }
}

/// One unit of work within a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub id: String,
    pub phase_key: PhaseKey,
    /// Raw step tag from the plan
    pub step_key: String,
    pub title: String,
    pub description: Option<String>,
    pub order: i64,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub agent_context: Option<AgentContext>,
}

impl StepRecord {
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Steps sharing a display phase, in plan order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseGroup {
    pub key: PhaseKey,
    pub name: String,
    pub icon: &'static str,
    pub steps: Vec<StepRecord>,
}

impl PhaseGroup {
    /// Aggregate status: failed wins, then all-completed, then any activity
    pub fn status(&self) -> StepStatus {
        if self.steps.iter().any(|s| s.status == StepStatus::Failed) {
            StepStatus::Failed
        } else if self.steps.iter().all(|s| s.status == StepStatus::Completed) {
            StepStatus::Completed
        } else if self.steps.iter().any(|s| s.status != StepStatus::NotStarted) {
            StepStatus::InProgress
        } else {
            StepStatus::NotStarted
        }
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }
}

/// Outcome of applying one status event to a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTransition {
    pub previous: StepStatus,
    pub current: StepStatus,
}

impl StepTransition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Per-task progress aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub phases: Vec<PhaseGroup>,
    /// Fixed when the plan is initialized
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    /// Most recent step observed in progress
    pub current_step_id: Option<String>,
    pub estimated_duration_secs: Option<u64>,
    #[serde(skip)]
    index: HashMap<String, (usize, usize)>,
}

impl TaskProgress {
    /// Build the aggregate from a plan.
    ///
    /// Steps are sorted by `step_order` (ties keep plan order) and grouped by
    /// phase display name, so each group sits at the position of its lowest
    /// step order. That order is never revisited.
    pub fn from_plan(plan: &StepPlan) -> Result<Self, ProgressError> {
        if plan.steps.is_empty() {
            return Err(ProgressError::PlanEmpty(plan.task_id.clone()));
        }

        let mut ordered: Vec<_> = plan.steps.iter().collect();
        ordered.sort_by_key(|step| step.step_order);

        let mut phases: Vec<PhaseGroup> = Vec::new();
        let mut index = HashMap::with_capacity(ordered.len());

        for step in ordered {
            let display = catalog::describe(&step.phase, &step.step, step.agent_context.as_ref())
                .map_err(|e| {
                    tracing::warn!(
                        "Step {} of task {} has no catalog entry: {}",
                        step.step_id,
                        plan.task_id,
                        e
                    );
                    ProgressError::Mapping {
                        step_id: step.step_id.clone(),
                        source: e,
                    }
                })?;

            if index.contains_key(&step.step_id) {
                return Err(ProgressError::DuplicateStep {
                    task_id: plan.task_id.clone(),
                    step_id: step.step_id.clone(),
                });
            }

            let phase_idx = match phases
                .iter()
                .position(|p| p.key == display.phase_key && p.name == display.phase_name)
            {
                Some(idx) => idx,
                None => {
                    phases.push(PhaseGroup {
                        key: display.phase_key,
                        name: display.phase_name.clone(),
                        icon: display.phase_icon,
                        steps: Vec::new(),
                    });
                    phases.len() - 1
                }
            };

            let group = &mut phases[phase_idx];
            index.insert(step.step_id.clone(), (phase_idx, group.steps.len()));
            group.steps.push(StepRecord {
                id: step.step_id.clone(),
                phase_key: display.phase_key,
                step_key: step.step.clone(),
                title: display.step_title,
                description: step.description.clone(),
                order: step.step_order,
                status: StepStatus::NotStarted,
                started_at: None,
                ended_at: None,
                agent_context: step.agent_context.clone(),
            });
        }

        if plan.total_steps != plan.steps.len() {
            tracing::warn!(
                "Plan for task {} reports {} steps but lists {}; using the listed steps",
                plan.task_id,
                plan.total_steps,
                plan.steps.len()
            );
        }

        Ok(Self {
            task_id: plan.task_id.clone(),
            phases,
            total_steps: plan.steps.len(),
            completed_steps: 0,
            failed_steps: 0,
            current_step_id: None,
            estimated_duration_secs: plan.estimated_duration_seconds,
            index,
        })
    }

    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.index
            .get(step_id)
            .map(|&(phase, step)| &self.phases[phase].steps[step])
    }

    pub fn current_step(&self) -> Option<&StepRecord> {
        self.current_step_id.as_deref().and_then(|id| self.step(id))
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }

    /// Completion percentage, rounded down
    pub fn percentage(&self) -> u8 {
        if self.total_steps == 0 {
            return 0;
        }
        (self.completed_steps * 100 / self.total_steps) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.completed_steps == self.total_steps
    }

    /// Full scan of `(completed, failed)`; must always equal the counters
    pub fn recount(&self) -> (usize, usize) {
        self.steps().fold((0, 0), |(completed, failed), step| match step.status {
            StepStatus::Completed => (completed + 1, failed),
            StepStatus::Failed => (completed, failed + 1),
            _ => (completed, failed),
        })
    }

    /// Apply one observed status to a step.
    ///
    /// Counters move by comparing the previous and new classification, so
    /// duplicates are no-ops and regressions are handled. Timestamps are
    /// written once and never overwritten.
    pub fn apply(
        &mut self,
        step_id: &str,
        status: ProgressStatus,
        at: DateTime<Utc>,
    ) -> Result<StepTransition, ProgressError> {
        let &(phase_idx, step_idx) =
            self.index
                .get(step_id)
                .ok_or_else(|| ProgressError::StepNotFound {
                    task_id: self.task_id.clone(),
                    step_id: step_id.to_string(),
                })?;

        let step = &mut self.phases[phase_idx].steps[step_idx];
        let transition = StepTransition {
            previous: step.status,
            current: status.into(),
        };
        if !transition.changed() {
            return Ok(transition);
        }

        step.status = transition.current;
        match transition.current {
            StepStatus::InProgress => {
                step.started_at.get_or_insert(at);
            }
            StepStatus::Completed | StepStatus::Failed => {
                step.ended_at.get_or_insert(at);
            }
            StepStatus::NotStarted => {}
        }

        let was_completed = transition.previous == StepStatus::Completed;
        let is_completed = transition.current == StepStatus::Completed;
        if is_completed && !was_completed {
            self.completed_steps += 1;
        } else if was_completed && !is_completed {
            self.completed_steps -= 1;
        }

        let was_failed = transition.previous == StepStatus::Failed;
        let is_failed = transition.current == StepStatus::Failed;
        if is_failed && !was_failed {
            self.failed_steps += 1;
        } else if was_failed && !is_failed {
            self.failed_steps -= 1;
        }

        if transition.current == StepStatus::InProgress {
            self.current_step_id = Some(step_id.to_string());
        } else if self.current_step_id.as_deref() == Some(step_id) {
            self.current_step_id = None;
        }

        Ok(transition)
    }
}
