//! Per-run mutable state: call stack, variable scopes, counters and status

use crate::collaborator::VariableView;
use crate::config::EngineConfig;
use crate::error::RunError;
use crate::validate::ValidatedFlow;
use planflow_protocol::{RunStatus, Variables};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a child frame's outputs go when it completes
#[derive(Debug, Clone)]
pub(crate) struct ReturnLink {
    /// Reference step in the parent frame
    pub(crate) step_id: String,
    /// Parent variable name -> child variable name
    pub(crate) outputs: BTreeMap<String, String>,
}

/// A nested flow invocation requested by a reference step
#[derive(Debug)]
pub struct ChildFrame {
    pub(crate) flow: Arc<ValidatedFlow>,
    pub(crate) scope: Variables,
    pub(crate) link: ReturnLink,
}

impl ChildFrame {
    /// Flow the child will run
    pub fn flow_name(&self) -> &str {
        self.flow.name()
    }

    /// Variables the child starts with
    pub fn scope(&self) -> &Variables {
        &self.scope
    }
}

/// One in-progress flow invocation on the call stack
#[derive(Debug)]
pub struct Frame {
    flow: Arc<ValidatedFlow>,
    index: usize,
    iterations: HashMap<String, u32>,
    scope: Variables,
    return_to: Option<ReturnLink>,
}

impl Frame {
    fn new(flow: Arc<ValidatedFlow>, scope: Variables, return_to: Option<ReturnLink>) -> Self {
        Self {
            flow,
            index: 0,
            iterations: HashMap::new(),
            scope,
            return_to,
        }
    }

    /// Flow this frame runs
    pub fn flow(&self) -> &Arc<ValidatedFlow> {
        &self.flow
    }

    /// Index of the next step to run
    pub fn index(&self) -> usize {
        self.index
    }

    /// Variables visible to this frame
    pub fn scope(&self) -> &Variables {
        &self.scope
    }

    /// Unsatisfied checks recorded for a goal step in this frame
    pub fn iterations(&self, step_id: &str) -> u32 {
        self.iterations.get(step_id).copied().unwrap_or(0)
    }

    /// Whether every step has run
    pub fn is_finished(&self) -> bool {
        self.index >= self.flow.steps.len()
    }
}

/// One executed step, kept for the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Call depth (1 = root flow)
    pub depth: usize,
    /// Flow owning the step
    pub flow: String,
    /// Step id
    pub step_id: String,
    /// Step variant name
    pub kind: String,
    /// Outcome label
    pub outcome: String,
}

/// Mutable state of a single run.
///
/// Frames live in a vector addressed by top-of-stack index. The root frame is
/// pushed at construction and never popped, so the stack is never empty.
#[derive(Debug)]
pub struct ExecutionContext {
    frames: Vec<Frame>,
    steps_executed: u64,
    max_total_steps: u64,
    max_call_depth: usize,
    status: RunStatus,
    trace: Vec<StepRecord>,
}

impl ExecutionContext {
    /// Create a context whose root frame runs `flow` with `initial` variables
    pub fn new(flow: Arc<ValidatedFlow>, initial: Variables, config: &EngineConfig) -> Self {
        Self {
            frames: vec![Frame::new(flow, initial, None)],
            steps_executed: 0,
            max_total_steps: config.max_total_steps,
            max_call_depth: config.max_call_depth,
            status: RunStatus::Ready,
            trace: Vec::new(),
        }
    }

    /// Current status
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Move to `next`; refused once a terminal status is reached
    pub(crate) fn transition(&mut self, next: RunStatus) -> bool {
        let allowed = match (self.status, next) {
            (current, _) if current.is_terminal() => false,
            (RunStatus::Ready, RunStatus::Running) => true,
            (_, next) => next.is_terminal(),
        };
        if allowed {
            self.status = next;
        } else {
            warn!(from = %self.status, to = %next, "Refused status transition");
        }
        allowed
    }

    /// Frames on the call stack, root included
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Current (top-of-stack) frame
    pub fn current(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn current_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    /// Step executions so far across all frames
    pub fn steps_executed(&self) -> u64 {
        self.steps_executed
    }

    /// Whether the global step budget is used up
    pub fn budget_exhausted(&self) -> bool {
        self.steps_executed >= self.max_total_steps
    }

    /// Configured global step budget
    pub fn max_total_steps(&self) -> u64 {
        self.max_total_steps
    }

    pub(crate) fn count_step(&mut self) {
        self.steps_executed += 1;
    }

    /// Variables of the current scope
    pub fn variables(&self) -> &Variables {
        &self.current().scope
    }

    /// Read-only view of the current scope
    pub fn view(&self) -> VariableView<'_> {
        VariableView::new(self.variables())
    }

    /// Value of `name` in the current scope
    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables().get(name).map(String::as_str)
    }

    /// Value of `name`, or `MissingVariable` attributed to `step_id`.
    /// An empty string is a present value.
    pub fn require(&self, step_id: &str, name: &str) -> Result<&str, RunError> {
        self.get(name).ok_or_else(|| RunError::MissingVariable {
            step_id: step_id.to_string(),
            name: name.to_string(),
        })
    }

    /// Overwrite `name` in the current scope
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.current_mut().scope.insert(name.into(), value.into());
    }

    pub(crate) fn advance(&mut self) {
        self.current_mut().index += 1;
    }

    /// Jump to `step_id` within the current frame
    pub(crate) fn jump_to(&mut self, step_id: &str) -> bool {
        let frame = self.current_mut();
        match frame.flow.position(step_id) {
            Some(position) => {
                frame.index = position;
                true
            }
            None => false,
        }
    }

    /// Record an unsatisfied check for `step_id` and return the new count
    pub(crate) fn bump_iterations(&mut self, step_id: &str) -> u32 {
        let counter = self
            .current_mut()
            .iterations
            .entry(step_id.to_string())
            .or_insert(0);
        *counter += 1;
        *counter
    }

    pub(crate) fn reset_iterations(&mut self, step_id: &str) {
        self.current_mut().iterations.remove(step_id);
    }

    /// Push a frame for a nested flow
    pub(crate) fn push_frame(&mut self, child: ChildFrame) -> Result<(), RunError> {
        if self.frames.len() >= self.max_call_depth {
            return Err(RunError::RecursionLimitExceeded {
                flow: child.flow.name().to_string(),
                limit: self.max_call_depth,
            });
        }
        debug!(flow = %child.flow.name(), depth = self.frames.len() + 1, "Entering nested flow");
        self.frames
            .push(Frame::new(child.flow, child.scope, Some(child.link)));
        Ok(())
    }

    /// Pop a finished nested frame, copy its allow-listed outputs into the
    /// parent scope and advance the parent past the reference step.
    pub(crate) fn return_from_frame(&mut self) -> Result<(), RunError> {
        if self.frames.len() <= 1 {
            return Ok(());
        }
        let Some(child) = self.frames.pop() else {
            return Ok(());
        };
        let Some(link) = child.return_to else {
            return Ok(());
        };

        let mut returned = Vec::with_capacity(link.outputs.len());
        for (parent_name, child_name) in &link.outputs {
            let value = child
                .scope
                .get(child_name)
                .ok_or_else(|| RunError::MissingVariable {
                    step_id: link.step_id.clone(),
                    name: child_name.clone(),
                })?;
            returned.push((parent_name.clone(), value.clone()));
        }

        let parent = self.current_mut();
        parent.scope.extend(returned);
        parent.index += 1;
        debug!(flow = %child.flow.name(), step = %link.step_id, "Returned from nested flow");
        Ok(())
    }

    /// Drop every nested frame without running further steps
    pub(crate) fn unwind(&mut self) {
        if self.frames.len() > 1 {
            debug!(frames = self.frames.len() - 1, "Unwinding nested frames");
            self.frames.truncate(1);
        }
    }

    pub(crate) fn record(&mut self, record: StepRecord) {
        self.trace.push(record);
    }

    /// Steps executed so far, in order
    pub fn trace(&self) -> &[StepRecord] {
        &self.trace
    }

    /// Consume the context, returning the root scope and the trace
    pub fn into_parts(self) -> (Variables, Vec<StepRecord>) {
        let variables = self
            .frames
            .into_iter()
            .next()
            .map(|root| root.scope)
            .unwrap_or_default();
        (variables, self.trace)
    }
}
