//! Step catalog
//!
//! Turns the backend's phase/step tags plus the agent context into the
//! phase name, icon and step title shown to the user. Phase grouping keys
//! on the exact display name, so output must be stable for equal input.

use crate::api::AgentContext;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Unknown phase tag: {0}")]
    UnknownPhase(String),

    #[error("Unknown step tag '{step}' for phase {phase}")]
    UnknownStep { phase: PhaseKey, step: String },
}

/// Logical phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKey {
    Initialization,
    AgentExecution,
    Completion,
}

impl PhaseKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::AgentExecution => "agent_execution",
            Self::Completion => "completion",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Initialization => "🚀",
            Self::AgentExecution => "🤖",
            Self::Completion => "🏁",
        }
    }

    fn steps(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Initialization => INITIALIZATION_STEPS,
            Self::AgentExecution => AGENT_STEPS,
            Self::Completion => COMPLETION_STEPS,
        }
    }
}

impl std::fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PhaseKey {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "initialization" => Ok(Self::Initialization),
            "agent_execution" => Ok(Self::AgentExecution),
            "completion" => Ok(Self::Completion),
            _ => Err(MappingError::UnknownPhase(s.to_string())),
        }
    }
}

const INITIALIZATION_STEPS: &[(&str, &str)] = &[
    ("validate_request", "Validating request"),
    ("clone_repository", "Cloning repository"),
    ("analyze_issue", "Analyzing issue"),
    ("prepare_workspace", "Preparing workspace"),
];

const AGENT_STEPS: &[(&str, &str)] = &[
    ("start_agent", "Starting agent"),
    ("plan_changes", "Planning changes"),
    ("implement_changes", "Implementing changes"),
    ("run_tests", "Running tests"),
    ("review_changes", "Reviewing changes"),
    ("commit_changes", "Committing changes"),
];

const COMPLETION_STEPS: &[(&str, &str)] = &[
    ("push_branch", "Pushing branch"),
    ("create_pull_request", "Creating pull request"),
    ("cleanup", "Cleaning up workspace"),
];

/// Display data for a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDisplay {
    pub phase_key: PhaseKey,
    pub phase_name: String,
    pub phase_icon: &'static str,
    pub step_title: String,
}

/// Map phase/step tags (and the agent running the step) to display data
pub fn describe(
    phase: &str,
    step: &str,
    agent: Option<&AgentContext>,
) -> Result<StepDisplay, MappingError> {
    let phase_key: PhaseKey = phase.parse()?;
    let step_tag = step.trim().to_lowercase();

    let base_title = phase_key
        .steps()
        .iter()
        .find(|(tag, _)| *tag == step_tag)
        .map(|(_, title)| *title)
        .ok_or_else(|| MappingError::UnknownStep {
            phase: phase_key,
            step: step.to_string(),
        })?;

    let step_title = match (phase_key, step_tag.as_str(), agent) {
        (PhaseKey::AgentExecution, "start_agent", Some(agent)) => match &agent.model {
            Some(model) => format!("Starting {} with {}", agent.agent, model),
            None => format!("Starting {}", agent.agent),
        },
        _ => base_title.to_string(),
    };

    Ok(StepDisplay {
        phase_key,
        phase_name: phase_name(phase_key, agent),
        phase_icon: phase_key.icon(),
        step_title,
    })
}

/// Display name of a phase; agent execution phases are named after the agent
pub fn phase_name(phase: PhaseKey, agent: Option<&AgentContext>) -> String {
    match (phase, agent) {
        (PhaseKey::Initialization, _) => "Initialization".to_string(),
        (PhaseKey::Completion, _) => "Completion".to_string(),
        (PhaseKey::AgentExecution, None) => "Agent Execution".to_string(),
        (PhaseKey::AgentExecution, Some(agent)) => {
            let mut name = agent.agent.clone();
            if let Some(surface) = &agent.surface {
                name.push_str(" · ");
                name.push_str(surface);
            }
            if let Some(role) = &agent.role {
                name.push_str(&format!(" ({})", role));
            }
            name
        }
    }
}
