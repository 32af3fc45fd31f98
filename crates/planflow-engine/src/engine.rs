use crate::collaborator::{GoalCompletionChecker, PluginFunctionInvoker};
use crate::config::EngineConfig;
use crate::context::{ExecutionContext, StepRecord};
use crate::error::{RegistryError, RunError, ValidationError};
use crate::registry::FlowRegistry;
use crate::report::{ExecutionReport, RunResult};
use crate::step::{StepOutcome, StepRunner};
use crate::validate::ValidatedFlow;
use chrono::Utc;
use planflow_protocol::{FlowDefinition, RunStatus, Variables};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Drives validated flows to a terminal status.
///
/// Holds no per-run state; clone it freely and run independent flows on
/// separate tasks.
#[derive(Clone)]
pub struct FlowExecutor {
    invoker: Arc<dyn PluginFunctionInvoker>,
    checker: Arc<dyn GoalCompletionChecker>,
    registry: Arc<dyn FlowRegistry>,
    config: EngineConfig,
}

impl FlowExecutor {
    /// Create a new executor
    pub fn new(
        invoker: Arc<dyn PluginFunctionInvoker>,
        checker: Arc<dyn GoalCompletionChecker>,
        registry: Arc<dyn FlowRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            invoker,
            checker,
            registry,
            config,
        }
    }

    /// Limits applied to runs
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry used for reference steps
    pub fn registry(&self) -> &Arc<dyn FlowRegistry> {
        &self.registry
    }

    /// Validate a flow against this executor's registry
    pub fn validate(&self, flow: FlowDefinition) -> Result<Arc<ValidatedFlow>, ValidationError> {
        ValidatedFlow::new(flow, self.registry.as_ref())
    }

    /// Execute a registered flow by name
    pub async fn execute_by_name(
        &self,
        flow_name: &str,
        initial: Variables,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport, RegistryError> {
        let flow = self.registry.resolve(flow_name)?;
        Ok(self.execute(&flow, initial, cancel).await)
    }

    /// Execute a flow until it reaches a terminal status
    #[instrument(skip_all, fields(flow = %flow.name()))]
    pub async fn execute(
        &self,
        flow: &Arc<ValidatedFlow>,
        initial: Variables,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "Starting flow execution: {}", flow.name());

        let mut ctx = ExecutionContext::new(Arc::clone(flow), initial, &self.config);
        ctx.transition(RunStatus::Running);

        let result = self.run_loop(&mut ctx, &cancel).await;

        if result.status != RunStatus::Completed {
            ctx.unwind();
        }
        ctx.transition(result.status);

        match &result.status {
            RunStatus::Completed => info!(%run_id, steps = ctx.steps_executed(), "Flow completed"),
            RunStatus::Escalated => warn!(
                %run_id,
                "Flow escalated: {}",
                result
                    .escalation
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            ),
            status => warn!(
                %run_id,
                %status,
                "Flow ended: {}",
                result.error.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
        }

        let steps_executed = ctx.steps_executed();
        let (variables, trace) = ctx.into_parts();
        ExecutionReport {
            run_id,
            flow: flow.name().to_string(),
            result,
            variables,
            steps_executed,
            trace,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run_loop(&self, ctx: &mut ExecutionContext, cancel: &CancellationToken) -> RunResult {
        let runner = StepRunner {
            invoker: self.invoker.as_ref(),
            checker: self.checker.as_ref(),
            registry: self.registry.as_ref(),
            config: &self.config,
            cancel,
        };

        loop {
            if cancel.is_cancelled() {
                info!("Cancellation observed before step");
                return RunResult::cancelled();
            }

            if ctx.current().is_finished() {
                if ctx.depth() == 1 {
                    return RunResult::completed();
                }
                if let Err(e) = ctx.return_from_frame() {
                    return RunResult::failed(e);
                }
                continue;
            }

            if ctx.budget_exhausted() {
                warn!("Step budget of {} exhausted", ctx.max_total_steps());
                return RunResult::failed(RunError::BudgetExceeded {
                    limit: ctx.max_total_steps(),
                });
            }

            let flow = Arc::clone(ctx.current().flow());
            let index = ctx.current().index();
            let Some(step) = flow.step(index) else {
                return RunResult::failed(RunError::StepExecution {
                    step_id: format!("#{}", index),
                    attempts: 0,
                    message: format!("flow {} has no step at index {}", flow.name(), index),
                });
            };

            debug!(step = %step.id, index, depth = ctx.depth(), "Executing step");
            let outcome = runner.run(step, ctx).await;
            ctx.count_step();
            ctx.record(StepRecord {
                depth: ctx.depth(),
                flow: flow.name().to_string(),
                step_id: step.id.clone(),
                kind: step.kind_name().to_string(),
                outcome: outcome.label(),
            });

            if cancel.is_cancelled() {
                info!(step = %step.id, "Cancellation observed after step");
                return RunResult::cancelled();
            }

            match outcome {
                StepOutcome::Continue => ctx.advance(),
                StepOutcome::Retry { .. } => {}
                StepOutcome::LoopBack(target) => {
                    if !ctx.jump_to(&target) {
                        return RunResult::failed(RunError::StepExecution {
                            step_id: step.id.clone(),
                            attempts: 1,
                            message: format!("loop target '{}' not found", target),
                        });
                    }
                }
                StepOutcome::Enter(child) => {
                    if let Err(e) = ctx.push_frame(child) {
                        return RunResult::failed(e);
                    }
                }
                StepOutcome::Escalate(reason) => return RunResult::escalated(reason),
                StepOutcome::Fail(error) => return RunResult::failed(error),
            }
        }
    }
}
