//! One-time structural validation of flow definitions
//!
//! [`ValidatedFlow`] is the only form of a flow the executor accepts, so a
//! flow that fails these checks can never run.

use crate::error::ValidationError;
use crate::registry::FlowRegistry;
use planflow_protocol::{FlowDefinition, Step, StepKind};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// Resolves a flow name to its definition during validation
pub(crate) type Lookup<'a> = dyn Fn(&str) -> Option<Arc<FlowDefinition>> + 'a;

/// A flow that passed validation; immutable and cheap to share
#[derive(Debug)]
pub struct ValidatedFlow {
    definition: Arc<FlowDefinition>,
    positions: HashMap<String, usize>,
}

impl ValidatedFlow {
    /// Validate `definition` against the flows known to `registry`
    pub fn new(
        definition: FlowDefinition,
        registry: &dyn FlowRegistry,
    ) -> Result<Arc<Self>, ValidationError> {
        let definition = Arc::new(definition);
        validate_flow(&definition, &|name: &str| {
            registry.resolve(name).ok().map(|flow| flow.shared_definition())
        })?;
        Ok(Arc::new(Self::from_checked(definition)))
    }

    /// Wrap a definition that already passed [`validate_flow`]
    pub(crate) fn from_checked(definition: Arc<FlowDefinition>) -> Self {
        let positions = definition
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.clone(), i))
            .collect();
        Self {
            definition,
            positions,
        }
    }

    /// The underlying definition
    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub(crate) fn shared_definition(&self) -> Arc<FlowDefinition> {
        Arc::clone(&self.definition)
    }

    /// Flow name
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Step at `index`
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.definition.steps.get(index)
    }

    /// Position of the step with the given id
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.positions.get(step_id).copied()
    }
}

impl Deref for ValidatedFlow {
    type Target = FlowDefinition;

    fn deref(&self) -> &Self::Target {
        &self.definition
    }
}

/// Check ids, policies, loop targets, reference resolution and acyclicity.
///
/// `lookup` resolves referenced flow names. The flow being validated always
/// resolves to itself so self-references are reported as cycles.
pub(crate) fn validate_flow(
    flow: &Arc<FlowDefinition>,
    lookup: &Lookup<'_>,
) -> Result<(), ValidationError> {
    check_structure(flow)?;

    let resolve = |name: &str| {
        if name == flow.name {
            Some(Arc::clone(flow))
        } else {
            lookup(name)
        }
    };

    let mut marks = HashMap::new();
    let mut path = Vec::new();
    visit(flow, &resolve, &mut marks, &mut path)?;

    debug!(flow = %flow.name, steps = flow.steps.len(), "Flow validated");
    Ok(())
}

fn check_structure(flow: &FlowDefinition) -> Result<(), ValidationError> {
    if flow.name.trim().is_empty() {
        return Err(ValidationError::EmptyFlowName);
    }
    if flow.steps.is_empty() {
        return Err(ValidationError::EmptyFlow(flow.name.clone()));
    }

    let mut seen = HashSet::new();
    for (position, step) in flow.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(ValidationError::EmptyStepId {
                flow: flow.name.clone(),
                position,
            });
        }
        if !seen.insert(step.id.as_str()) {
            return Err(ValidationError::DuplicateStepId {
                flow: flow.name.clone(),
                step: step.id.clone(),
            });
        }
    }

    for (position, step) in flow.steps.iter().enumerate() {
        let invalid = |reason: &str| ValidationError::InvalidPolicy {
            flow: flow.name.clone(),
            step: step.id.clone(),
            reason: reason.to_string(),
        };

        match &step.kind {
            StepKind::Function(function) => {
                if function.capability.trim().is_empty() {
                    return Err(invalid("capability cannot be empty"));
                }
                if function.retry.max_attempts == 0 {
                    return Err(invalid("max_attempts must be at least 1"));
                }
            }
            StepKind::Goal(goal) => {
                if goal.max_iterations == 0 {
                    return Err(invalid("max_iterations must be at least 1"));
                }
                match flow.position(&goal.body_start) {
                    Some(target) if target <= position => {}
                    _ => {
                        return Err(ValidationError::MalformedLoopTarget {
                            flow: flow.name.clone(),
                            step: step.id.clone(),
                            target: goal.body_start.clone(),
                        })
                    }
                }
            }
            StepKind::Reference(_) => {}
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Depth-first walk over the reference graph; unvisited flows have no mark.
fn visit(
    flow: &FlowDefinition,
    resolve: &dyn Fn(&str) -> Option<Arc<FlowDefinition>>,
    marks: &mut HashMap<String, Mark>,
    path: &mut Vec<String>,
) -> Result<(), ValidationError> {
    marks.insert(flow.name.clone(), Mark::InProgress);
    path.push(flow.name.clone());

    for step in &flow.steps {
        let StepKind::Reference(reference) = &step.kind else {
            continue;
        };
        let target = reference.flow.as_str();

        match marks.get(target) {
            Some(Mark::Done) => continue,
            Some(Mark::InProgress) => {
                let start = path.iter().position(|name| name == target).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(target.to_string());
                return Err(ValidationError::ReferenceCycle { path: cycle });
            }
            None => {
                let child = resolve(target).ok_or_else(|| ValidationError::UnresolvedReference {
                    flow: flow.name.clone(),
                    step: step.id.clone(),
                    target: target.to_string(),
                })?;
                visit(&child, resolve, marks, path)?;
            }
        }
    }

    path.pop();
    marks.insert(flow.name.clone(), Mark::Done);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryFlowRegistry;
    use planflow_protocol::{FunctionStep, GoalStep, ReferenceFlowStep, RetryPolicy};
    use pretty_assertions::assert_eq;

    fn call(id: &str) -> Step {
        Step::new(id, FunctionStep::new("text__echo"))
    }

    fn reference(id: &str, flow: &str) -> Step {
        Step::new(id, ReferenceFlowStep::new(flow))
    }

    fn validate_alone(flow: FlowDefinition) -> Result<Arc<ValidatedFlow>, ValidationError> {
        ValidatedFlow::new(flow, &InMemoryFlowRegistry::empty())
    }

    #[test]
    fn test_duplicate_step_id() {
        let flow = FlowDefinition::new("dup")
            .with_step(call("a"))
            .with_step(call("b"))
            .with_step(call("a"));

        assert_eq!(
            validate_alone(flow).unwrap_err(),
            ValidationError::DuplicateStepId {
                flow: "dup".into(),
                step: "a".into()
            }
        );
    }

    #[test]
    fn test_empty_flow_and_ids() {
        assert_eq!(
            validate_alone(FlowDefinition::new("none")).unwrap_err(),
            ValidationError::EmptyFlow("none".into())
        );
        assert_eq!(
            validate_alone(FlowDefinition::new(" ").with_step(call("a"))).unwrap_err(),
            ValidationError::EmptyFlowName
        );
        assert!(matches!(
            validate_alone(FlowDefinition::new("f").with_step(call(""))).unwrap_err(),
            ValidationError::EmptyStepId { position: 0, .. }
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let flow = FlowDefinition::new("f").with_step(Step::new(
            "a",
            FunctionStep::new("text__echo").with_retry(RetryPolicy::attempts(0)),
        ));
        assert!(matches!(
            validate_alone(flow).unwrap_err(),
            ValidationError::InvalidPolicy { .. }
        ));
    }

    #[test]
    fn test_loop_target_must_precede_goal() {
        let forward = FlowDefinition::new("f")
            .with_step(Step::new("goal", GoalStep::new("done", "later", 3)))
            .with_step(call("later"));
        assert!(matches!(
            validate_alone(forward).unwrap_err(),
            ValidationError::MalformedLoopTarget { .. }
        ));

        let missing = FlowDefinition::new("f")
            .with_step(call("a"))
            .with_step(Step::new("goal", GoalStep::new("done", "nowhere", 3)));
        assert!(matches!(
            validate_alone(missing).unwrap_err(),
            ValidationError::MalformedLoopTarget { .. }
        ));

        let self_loop = FlowDefinition::new("f")
            .with_step(call("a"))
            .with_step(Step::new("goal", GoalStep::new("done", "goal", 3)));
        assert!(validate_alone(self_loop).is_ok());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let flow = FlowDefinition::new("f")
            .with_step(call("a"))
            .with_step(Step::new("goal", GoalStep::new("done", "a", 0)));
        assert!(matches!(
            validate_alone(flow).unwrap_err(),
            ValidationError::InvalidPolicy { .. }
        ));
    }

    #[test]
    fn test_unresolved_reference() {
        let flow = FlowDefinition::new("parent").with_step(reference("sub", "missing"));
        assert_eq!(
            validate_alone(flow).unwrap_err(),
            ValidationError::UnresolvedReference {
                flow: "parent".into(),
                step: "sub".into(),
                target: "missing".into()
            }
        );
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let flow = FlowDefinition::new("loop").with_step(reference("again", "loop"));
        assert_eq!(
            validate_alone(flow).unwrap_err(),
            ValidationError::ReferenceCycle {
                path: vec!["loop".into(), "loop".into()]
            }
        );
    }

    #[test]
    fn test_two_flow_cycle() {
        let result = InMemoryFlowRegistry::builder()
            .add(FlowDefinition::new("a").with_step(reference("to_b", "b")))
            .add(FlowDefinition::new("b").with_step(reference("to_a", "a")))
            .build();

        assert_eq!(
            result.unwrap_err(),
            ValidationError::ReferenceCycle {
                path: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_deep_chain_and_diamond_validate() {
        let mut builder = InMemoryFlowRegistry::builder();
        for i in 0..20 {
            let mut flow = FlowDefinition::new(format!("level{}", i)).with_step(call("work"));
            if i < 19 {
                flow = flow.with_step(reference("next", &format!("level{}", i + 1)));
            }
            builder = builder.add(flow);
        }
        // Diamond: two paths reach the same flow, which is not a cycle.
        builder = builder.add(
            FlowDefinition::new("top")
                .with_step(reference("left", "level18"))
                .with_step(reference("right", "level18")),
        );

        let registry = builder.build().expect("acyclic flows validate");
        assert_eq!(registry.len(), 21);
    }
}
