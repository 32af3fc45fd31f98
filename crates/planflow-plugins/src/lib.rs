//! Plugin Functions and Flow Files
//!
//! Concrete collaborators for the flow engine: a schema-checked function
//! registry, a handful of builtin text functions, a variable-based goal
//! checker and a loader for flow definition files.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Builtin text functions
pub mod builtins;
/// Variable-based goal checker
pub mod goal;
/// File-based flow loader
pub mod loader;
/// Function registry
pub mod registry;

pub use builtins::register_builtins;
pub use goal::{GoalExpr, VariableGoalChecker};
pub use loader::{FlowLoader, LoadedFlow, LoaderError};
pub use registry::{handler, FunctionHandler, FunctionRegistry, ToolError};
