//! Execution of individual steps
//!
//! Each variant turns the current context into a [`StepOutcome`]; the run loop
//! in [`crate::engine`] decides what the outcome means for the call stack.

use crate::collaborator::{GoalCompletionChecker, PluginFunctionInvoker};
use crate::config::EngineConfig;
use crate::context::{ChildFrame, ExecutionContext, ReturnLink};
use crate::error::{EscalationReason, InvocationError, RunError};
use crate::registry::FlowRegistry;
use planflow_protocol::{FunctionStep, GoalStep, ReferenceFlowStep, Step, StepKind, Variables};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Result of executing one step
#[derive(Debug)]
pub enum StepOutcome {
    /// Move to the next step
    Continue,
    /// Run the same step again after `delay`
    Retry {
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Wait before the next attempt
        delay: Duration,
    },
    /// Jump back to the step with this id in the same frame
    LoopBack(String),
    /// End the run for external resolution
    Escalate(EscalationReason),
    /// End the run as failed
    Fail(RunError),
    /// Push a frame for a nested flow
    Enter(ChildFrame),
}

impl StepOutcome {
    /// Short label for logs and traces
    pub fn label(&self) -> String {
        match self {
            StepOutcome::Continue => "continue".to_string(),
            StepOutcome::Retry { attempt, .. } => format!("retry:{}", attempt),
            StepOutcome::LoopBack(target) => format!("loop_back:{}", target),
            StepOutcome::Escalate(_) => "escalate".to_string(),
            StepOutcome::Fail(_) => "fail".to_string(),
            StepOutcome::Enter(child) => format!("enter:{}", child.flow_name()),
        }
    }
}

/// Borrowed collaborators for executing steps within one run
pub(crate) struct StepRunner<'a> {
    pub(crate) invoker: &'a dyn PluginFunctionInvoker,
    pub(crate) checker: &'a dyn GoalCompletionChecker,
    pub(crate) registry: &'a dyn FlowRegistry,
    pub(crate) config: &'a EngineConfig,
    pub(crate) cancel: &'a CancellationToken,
}

impl StepRunner<'_> {
    /// Execute `step` against the current frame of `ctx`
    #[instrument(skip_all, fields(step = %step.id, kind = step.kind_name()))]
    pub(crate) async fn run(&self, step: &Step, ctx: &mut ExecutionContext) -> StepOutcome {
        match &step.kind {
            StepKind::Function(function) => self.run_function(&step.id, function, ctx).await,
            StepKind::Goal(goal) => self.run_goal(&step.id, goal, ctx).await,
            StepKind::Reference(reference) => self.run_reference(&step.id, reference, ctx),
        }
    }

    async fn run_function(
        &self,
        step_id: &str,
        function: &FunctionStep,
        ctx: &mut ExecutionContext,
    ) -> StepOutcome {
        let inputs = match collect_inputs(step_id, function, ctx) {
            Ok(inputs) => inputs,
            Err(e) => return StepOutcome::Fail(e),
        };

        let mut attempt = 1;
        loop {
            match self.attempt_function(step_id, function, &inputs, attempt, ctx).await {
                StepOutcome::Retry { attempt: failed, delay } => {
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return StepOutcome::Fail(RunError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    attempt = failed + 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// One invocation; `Retry` when the policy allows another attempt
    async fn attempt_function(
        &self,
        step_id: &str,
        function: &FunctionStep,
        inputs: &Variables,
        attempt: u32,
        ctx: &mut ExecutionContext,
    ) -> StepOutcome {
        debug!(capability = %function.capability, attempt, "Invoking function");

        let timeout = function
            .timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.config.default_step_timeout());

        let result = within(timeout, self.invoker.invoke(&function.capability, inputs)).await;

        if self.cancel.is_cancelled() {
            debug!("Discarding function result after cancellation");
            return StepOutcome::Fail(RunError::Cancelled);
        }

        match result {
            Ok(mut outputs) => {
                for name in &function.outputs {
                    match outputs.remove(name) {
                        Some(value) => ctx.set(name.clone(), value),
                        None => {
                            return StepOutcome::Fail(RunError::StepExecution {
                                step_id: step_id.to_string(),
                                attempts: attempt,
                                message: format!(
                                    "function {} did not return declared output '{}'",
                                    function.capability, name
                                ),
                            })
                        }
                    }
                }
                StepOutcome::Continue
            }
            Err(e) if e.is_retryable() && function.retry.should_retry(attempt) => {
                let delay = function.retry.delay_after(attempt);
                warn!(
                    "Step {} failed (attempt {}/{}), retrying after {}ms: {}",
                    step_id,
                    attempt,
                    function.retry.max_attempts,
                    delay.as_millis(),
                    e
                );
                StepOutcome::Retry { attempt, delay }
            }
            Err(e) => {
                warn!("Step {} failed after {} attempt(s): {}", step_id, attempt, e);
                StepOutcome::Fail(RunError::StepExecution {
                    step_id: step_id.to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn run_goal(&self, step_id: &str, goal: &GoalStep, ctx: &mut ExecutionContext) -> StepOutcome {
        let check = within(
            self.config.default_step_timeout(),
            self.checker.is_satisfied(&goal.goal, ctx.view()),
        );
        let verdict = tokio::select! {
            _ = self.cancel.cancelled() => return StepOutcome::Fail(RunError::Cancelled),
            verdict = check => verdict,
        };

        if self.cancel.is_cancelled() {
            return StepOutcome::Fail(RunError::Cancelled);
        }

        match verdict {
            Ok(true) => {
                debug!(goal = %goal.goal, "Goal satisfied");
                ctx.reset_iterations(step_id);
                StepOutcome::Continue
            }
            Ok(false) => {
                let iterations = ctx.bump_iterations(step_id);
                if iterations >= goal.max_iterations {
                    warn!(
                        "Goal '{}' not satisfied after {} iteration(s), escalating",
                        goal.goal, iterations
                    );
                    StepOutcome::Escalate(EscalationReason::BudgetExceeded {
                        step_id: step_id.to_string(),
                        goal: goal.goal.clone(),
                        iterations,
                    })
                } else {
                    debug!(iterations, target = %goal.body_start, "Goal not satisfied, looping back");
                    StepOutcome::LoopBack(goal.body_start.clone())
                }
            }
            Err(e) => StepOutcome::Fail(RunError::StepExecution {
                step_id: step_id.to_string(),
                attempts: 1,
                message: format!("goal check failed: {}", e),
            }),
        }
    }

    fn run_reference(
        &self,
        step_id: &str,
        reference: &ReferenceFlowStep,
        ctx: &ExecutionContext,
    ) -> StepOutcome {
        let flow = match self.registry.resolve(&reference.flow) {
            Ok(flow) => flow,
            Err(_) => {
                return StepOutcome::Fail(RunError::FlowNotFound {
                    flow: reference.flow.clone(),
                })
            }
        };

        let mut scope = Variables::with_capacity(reference.inputs.len());
        for (child_name, parent_name) in &reference.inputs {
            match ctx.require(step_id, parent_name) {
                Ok(value) => {
                    scope.insert(child_name.clone(), value.to_string());
                }
                Err(e) => return StepOutcome::Fail(e),
            }
        }

        StepOutcome::Enter(ChildFrame {
            flow,
            scope,
            link: ReturnLink {
                step_id: step_id.to_string(),
                outputs: reference.outputs.clone(),
            },
        })
    }
}

/// Await a collaborator call, bounded by `limit` when set
async fn within<T, F>(limit: Option<Duration>, call: F) -> Result<T, InvocationError>
where
    F: Future<Output = Result<T, InvocationError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(InvocationError::Timeout(limit.as_millis() as u64))),
        None => call.await,
    }
}

/// Declared inputs of a function step; absent optional inputs are omitted
fn collect_inputs(
    step_id: &str,
    function: &FunctionStep,
    ctx: &ExecutionContext,
) -> Result<Variables, RunError> {
    let mut inputs = Variables::with_capacity(function.inputs.len() + function.optional_inputs.len());
    for name in &function.inputs {
        inputs.insert(name.clone(), ctx.require(step_id, name)?.to_string());
    }
    for name in &function.optional_inputs {
        if let Some(value) = ctx.get(name) {
            inputs.insert(name.clone(), value.to_string());
        }
    }
    Ok(inputs)
}
