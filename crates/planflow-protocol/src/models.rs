use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Variable bindings threaded between steps (name -> value).
pub type Variables = HashMap<String, String>;

/// Definition of a flow
///
/// Flows are ordered sequences of steps. Step order encodes data dependency:
/// a step may only read variables produced by earlier steps or provided as
/// initial input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlowDefinition {
    /// Unique name of the flow, used by reference steps
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Ordered sequence of steps
    pub steps: Vec<Step>,
}

impl FlowDefinition {
    /// Create an empty flow with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a step
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Names of the flows referenced directly by this flow
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| match &step.kind {
            StepKind::Reference(reference) => Some(reference.flow.as_str()),
            _ => None,
        })
    }

    /// Position of the step with the given id
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}

/// A single step in a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Identifier, unique within the owning flow
    pub id: String,
    /// What the step does
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    /// Create a step from any step payload
    pub fn new(id: impl Into<String>, kind: impl Into<StepKind>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }

    /// Short name of the variant, used in logs and traces
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Function(_) => "function",
            StepKind::Goal(_) => "goal",
            StepKind::Reference(_) => "reference",
        }
    }

    /// Variable names this step reads from its scope
    pub fn reads(&self) -> Vec<&str> {
        match &self.kind {
            StepKind::Function(f) => f
                .inputs
                .iter()
                .chain(f.optional_inputs.iter())
                .map(String::as_str)
                .collect(),
            StepKind::Goal(_) => Vec::new(),
            StepKind::Reference(r) => r.inputs.values().map(String::as_str).collect(),
        }
    }

    /// Variable names this step writes into its scope
    pub fn produces(&self) -> Vec<&str> {
        match &self.kind {
            StepKind::Function(f) => f.outputs.iter().map(String::as_str).collect(),
            StepKind::Goal(_) => Vec::new(),
            StepKind::Reference(r) => r.outputs.keys().map(String::as_str).collect(),
        }
    }
}

/// Step variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke a plugin function
    Function(FunctionStep),
    /// Check a goal and loop back until it is satisfied
    Goal(GoalStep),
    /// Run another flow in an isolated scope
    Reference(ReferenceFlowStep),
}

impl From<FunctionStep> for StepKind {
    fn from(step: FunctionStep) -> Self {
        StepKind::Function(step)
    }
}

impl From<GoalStep> for StepKind {
    fn from(step: GoalStep) -> Self {
        StepKind::Goal(step)
    }
}

impl From<ReferenceFlowStep> for StepKind {
    fn from(step: ReferenceFlowStep) -> Self {
        StepKind::Reference(step)
    }
}

/// Calls a capability with declared inputs and stores its declared outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FunctionStep {
    /// Capability id understood by the function invoker (e.g. "text__upper")
    pub capability: String,
    /// Variables that must be present when the step runs
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Variables passed along only when present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional_inputs: Vec<String>,
    /// Variables written back from the invocation result
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Retry policy for invoker failures
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-attempt timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl FunctionStep {
    /// Create a function step for the given capability
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            inputs: Vec::new(),
            optional_inputs: Vec::new(),
            outputs: Vec::new(),
            retry: RetryPolicy::default(),
            timeout_ms: None,
        }
    }

    /// Declare a required input
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// Declare an optional input
    pub fn with_optional_input(mut self, name: impl Into<String>) -> Self {
        self.optional_inputs.push(name.into());
        self
    }

    /// Declare an output
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Repeats a body of steps until a goal is judged satisfied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GoalStep {
    /// Goal description handed to the completion checker
    pub goal: String,
    /// Id of the first step of the loop body (same flow, at or before this step)
    pub body_start: String,
    /// Number of unsatisfied checks allowed before escalating
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    3
}

impl GoalStep {
    /// Create a goal step
    pub fn new(goal: impl Into<String>, body_start: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            goal: goal.into(),
            body_start: body_start.into(),
            max_iterations,
        }
    }
}

/// Runs another flow with explicitly mapped inputs and outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceFlowStep {
    /// Name of the referenced flow
    pub flow: String,
    /// Child variable name -> parent variable name
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Parent variable name -> child variable name.
    /// Child variables not listed here are discarded.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl ReferenceFlowStep {
    /// Reference the named flow with no mappings
    pub fn new(flow: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Pass the parent's `parent` variable to the child as `child`
    pub fn map_input(mut self, child: impl Into<String>, parent: impl Into<String>) -> Self {
        self.inputs.insert(child.into(), parent.into());
        self
    }

    /// Copy the child's `child` variable back into the parent as `parent`
    pub fn map_output(mut self, parent: impl Into<String>, child: impl Into<String>) -> Self {
        self.outputs.insert(parent.into(), child.into());
        self
    }
}

/// Retry policy for function steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    /// Total number of invocations allowed (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    /// Allow up to `max_attempts` invocations with no delay
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    /// Set the backoff
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay_after(attempt)
    }
}

/// Backoff between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately
    #[default]
    None,
    /// Wait the same delay every time
    Fixed {
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// initial_ms * multiplier^(attempt-1), capped at max_ms
    Exponential {
        /// Delay after the first failure
        initial_ms: u64,
        /// Growth factor per attempt
        #[serde(default = "default_multiplier")]
        multiplier: u32,
        /// Upper bound for a single delay
        max_ms: u64,
    },
}

fn default_multiplier() -> u32 {
    2
}

impl Backoff {
    /// Delay to wait after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                let factor = u64::from(multiplier).saturating_pow(attempt.saturating_sub(1));
                Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

/// Definition of a plugin function
///
/// Functions are what function steps call. Arguments are the step's input
/// variables, checked against `input_schema` before the handler runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FunctionDefinition {
    /// Name of the function within its plugin
    pub name: String,
    /// Human-readable description of what the function does
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the expected input variables
    #[serde(default = "any_object")]
    pub input_schema: serde_json::Value,
}

impl FunctionDefinition {
    /// Function accepting any object
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: any_object(),
        }
    }

    /// Replace the input schema
    pub fn with_schema(mut self, input_schema: serde_json::Value) -> Self {
        self.input_schema = input_schema;
        self
    }
}

fn any_object() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not started
    Ready,
    /// Executing steps
    Running,
    /// All steps of the root flow finished
    Completed,
    /// A step failed or a limit was hit
    Failed,
    /// A goal could not be confirmed within its budget
    Escalated,
    /// The caller cancelled the run
    Cancelled,
}

impl RunStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Escalated | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Ready => write!(f, "ready"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Escalated => write!(f, "escalated"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
