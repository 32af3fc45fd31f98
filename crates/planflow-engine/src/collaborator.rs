//! Contracts for the external services steps call into

use crate::error::InvocationError;
use async_trait::async_trait;
use planflow_protocol::Variables;

/// Invokes plugin functions on behalf of function steps
#[async_trait]
pub trait PluginFunctionInvoker: Send + Sync {
    /// Call `capability_id` with the step's declared inputs
    async fn invoke(
        &self,
        capability_id: &str,
        inputs: &Variables,
    ) -> Result<Variables, InvocationError>;
}

/// Judges whether a goal is satisfied given the current variables
#[async_trait]
pub trait GoalCompletionChecker: Send + Sync {
    /// Return `true` when the goal is met
    async fn is_satisfied(
        &self,
        goal: &str,
        variables: VariableView<'_>,
    ) -> Result<bool, InvocationError>;
}

/// Read-only view of the variables in the current scope
#[derive(Debug, Clone, Copy)]
pub struct VariableView<'a> {
    variables: &'a Variables,
}

impl<'a> VariableView<'a> {
    /// Wrap a variable map
    pub fn new(variables: &'a Variables) -> Self {
        Self { variables }
    }

    /// Value of `name`, if set
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Whether `name` is set (possibly to an empty string)
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether no variables are set
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Iterate over name/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.variables
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}
