//! PlanFlow Protocol - Flow definitions shared across the PlanFlow crates
//!
//! This crate holds the serializable model that the engine executes. A flow is
//! produced once (by a planner, a file on disk, or code), validated by
//! `planflow-engine`, and never mutated afterwards.
//!
//! # Core Types
//!
//! - [`FlowDefinition`] - An ordered list of uniquely identified steps
//! - [`Step`] / [`StepKind`] - One unit of work: function call, goal loop, or nested flow
//! - [`RetryPolicy`] / [`Backoff`] - How a function step reacts to invoker failures
//! - [`RunStatus`] - Lifecycle of a single run
//!
//! # Example
//!
//! ```rust
//! use planflow_protocol::{FlowDefinition, FunctionStep, GoalStep, RetryPolicy, Step};
//!
//! let flow = FlowDefinition::new("summarize")
//!     .with_step(Step::new(
//!         "fetch",
//!         FunctionStep::new("web__fetch")
//!             .with_input("url")
//!             .with_output("page")
//!             .with_retry(RetryPolicy::attempts(3)),
//!     ))
//!     .with_step(Step::new("check", GoalStep::new("page is summarized", "fetch", 3)));
//!
//! assert_eq!(flow.steps.len(), 2);
//! assert_eq!(flow.steps[0].reads(), vec!["url"]);
//! ```

#![warn(missing_docs)]

/// Protocol models module
pub mod models;

pub use models::*;
