//! Error taxonomy for validation, registry lookups, collaborators and runs

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural problems found before a flow may run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Flow has an empty name
    #[error("Flow name cannot be empty")]
    EmptyFlowName,

    /// Flow has no steps
    #[error("Flow {0} has no steps")]
    EmptyFlow(String),

    /// A step has an empty id
    #[error("Flow {flow} has a step with an empty id at position {position}")]
    EmptyStepId {
        /// Owning flow
        flow: String,
        /// Zero-based position of the step
        position: usize,
    },

    /// Two steps share an id
    #[error("Duplicate step id '{step}' in flow {flow}")]
    DuplicateStepId {
        /// Owning flow
        flow: String,
        /// The repeated id
        step: String,
    },

    /// Two flows share a name in one registry
    #[error("Flow {0} is defined more than once")]
    DuplicateFlow(String),

    /// Retry or iteration settings that can never run
    #[error("Invalid policy on step {step} in flow {flow}: {reason}")]
    InvalidPolicy {
        /// Owning flow
        flow: String,
        /// Offending step
        step: String,
        /// What is wrong
        reason: String,
    },

    /// Loop target missing, after the goal step, or in another flow
    #[error("Step {step} in flow {flow} loops back to '{target}', which is not an earlier step of the same flow")]
    MalformedLoopTarget {
        /// Owning flow
        flow: String,
        /// The goal step
        step: String,
        /// The requested loop target
        target: String,
    },

    /// Reference to a flow the registry does not know
    #[error("Step {step} in flow {flow} references unknown flow '{target}'")]
    UnresolvedReference {
        /// Owning flow
        flow: String,
        /// The reference step
        step: String,
        /// The missing flow name
        target: String,
    },

    /// Flows reference each other in a loop
    #[error("Reference cycle detected: {}", path.join(" -> "))]
    ReferenceCycle {
        /// Flow names along the cycle, first and last equal
        path: Vec<String>,
    },
}

/// Errors returned by a [`FlowRegistry`](crate::registry::FlowRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No flow with that name
    #[error("Flow not found: {0}")]
    NotFound(String),

    /// A flow failed validation while building the registry
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors reported by collaborators (function invoker, goal checker)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// Capability does not exist
    #[error("Function not found: {0}")]
    NotFound(String),

    /// Inputs rejected by the callee
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Callee failed
    #[error("Execution error: {0}")]
    Failed(String),

    /// Attempt exceeded its timeout
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

impl InvocationError {
    /// Whether repeating the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, InvocationError::Failed(_) | InvocationError::Timeout(_))
    }
}

/// Why a run ended in `Failed` or `Cancelled`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    /// A declared variable was absent at execution time
    #[error("Step {step_id} is missing variable '{name}'")]
    MissingVariable {
        /// Step that needed the variable
        step_id: String,
        /// Variable name
        name: String,
    },

    /// Collaborator call failed after exhausting the retry policy
    #[error("Step {step_id} failed after {attempts} attempt(s): {message}")]
    StepExecution {
        /// Failing step
        step_id: String,
        /// Invocations made
        attempts: u32,
        /// Last error
        message: String,
    },

    /// The global step counter hit its limit
    #[error("Step budget of {limit} exceeded")]
    BudgetExceeded {
        /// Configured limit
        limit: u64,
    },

    /// The call stack would grow past its limit
    #[error("Call depth limit of {limit} exceeded entering flow {flow}")]
    RecursionLimitExceeded {
        /// Flow that could not be entered
        flow: String,
        /// Configured limit
        limit: usize,
    },

    /// Referenced flow vanished from the registry
    #[error("Flow not found: {flow}")]
    FlowNotFound {
        /// Missing flow name
        flow: String,
    },

    /// Caller cancelled the run
    #[error("Run cancelled")]
    Cancelled,
}

/// Why a run ended in `Escalated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// A goal step used all of its iterations without the goal being satisfied
    BudgetExceeded {
        /// The goal step
        step_id: String,
        /// Goal text
        goal: String,
        /// Unsatisfied checks performed
        iterations: u32,
    },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationReason::BudgetExceeded {
                step_id,
                goal,
                iterations,
            } => write!(
                f,
                "Goal '{}' at step {} not satisfied after {} iteration(s)",
                goal, step_id, iterations
            ),
        }
    }
}

/// Errors loading engine configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for [`EngineConfig`](crate::config::EngineConfig)
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but cannot be used
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
