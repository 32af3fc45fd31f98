//! Flow Execution Engine
//!
//! Validates flow definitions and runs them as sequential state machines:
//! function calls with retry, goal loops with iteration budgets, and nested
//! flows on an explicit call stack.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Collaborator contracts
pub mod collaborator;
/// Engine limits
pub mod config;
/// Per-run state
pub mod context;
/// The run loop
pub mod engine;
/// Error taxonomy
pub mod error;
/// Flow lookup
pub mod registry;
/// Run reports
pub mod report;
/// Step execution
pub mod step;
/// Flow validation
pub mod validate;

pub use collaborator::{GoalCompletionChecker, PluginFunctionInvoker, VariableView};
pub use config::EngineConfig;
pub use context::{ExecutionContext, Frame, StepRecord};
pub use engine::FlowExecutor;
pub use error::{
    ConfigError, EscalationReason, InvocationError, RegistryError, RunError, ValidationError,
};
pub use registry::{FlowRegistry, FlowRegistryBuilder, InMemoryFlowRegistry};
pub use report::{ExecutionReport, RunResult};
pub use step::StepOutcome;
pub use validate::ValidatedFlow;

pub use planflow_protocol::{RunStatus, Variables};
pub use tokio_util::sync::CancellationToken;
