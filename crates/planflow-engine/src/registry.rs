//! Read-only lookup of validated flows by name

use crate::error::{RegistryError, ValidationError};
use crate::validate::{validate_flow, ValidatedFlow};
use planflow_protocol::FlowDefinition;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Resolves flow names for reference steps
pub trait FlowRegistry: Send + Sync {
    /// Look up a validated flow
    fn resolve(&self, name: &str) -> Result<Arc<ValidatedFlow>, RegistryError>;

    /// Names of all known flows
    fn names(&self) -> Vec<String>;
}

/// Registry built once from a set of definitions and never mutated afterwards
#[derive(Debug, Default, Clone)]
pub struct InMemoryFlowRegistry {
    flows: Arc<HashMap<String, Arc<ValidatedFlow>>>,
}

impl InMemoryFlowRegistry {
    /// Start collecting definitions
    pub fn builder() -> FlowRegistryBuilder {
        FlowRegistryBuilder::default()
    }

    /// A registry with no flows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether the registry has no flows
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl FlowRegistry for InMemoryFlowRegistry {
    fn resolve(&self, name: &str) -> Result<Arc<ValidatedFlow>, RegistryError> {
        self.flows
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.flows.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Collects definitions and validates them together
#[derive(Debug, Default)]
pub struct FlowRegistryBuilder {
    flows: Vec<FlowDefinition>,
}

impl FlowRegistryBuilder {
    /// Add a definition
    pub fn add(mut self, flow: FlowDefinition) -> Self {
        self.flows.push(flow);
        self
    }

    /// Add a definition in place
    pub fn push(&mut self, flow: FlowDefinition) {
        self.flows.push(flow);
    }

    /// Add several definitions
    pub fn extend(mut self, flows: impl IntoIterator<Item = FlowDefinition>) -> Self {
        self.flows.extend(flows);
        self
    }

    /// Validate every flow against the full set and freeze the registry.
    ///
    /// Flows are checked in insertion order so the first error is stable.
    pub fn build(self) -> Result<InMemoryFlowRegistry, ValidationError> {
        let mut order = Vec::with_capacity(self.flows.len());
        let mut definitions: HashMap<String, Arc<FlowDefinition>> = HashMap::new();

        for flow in self.flows {
            if definitions.contains_key(&flow.name) {
                return Err(ValidationError::DuplicateFlow(flow.name));
            }
            order.push(flow.name.clone());
            definitions.insert(flow.name.clone(), Arc::new(flow));
        }

        let mut flows = HashMap::with_capacity(definitions.len());
        for name in order {
            let definition = Arc::clone(&definitions[&name]);
            validate_flow(&definition, &|target: &str| definitions.get(target).cloned())?;
            flows.insert(name, Arc::new(ValidatedFlow::from_checked(definition)));
        }

        info!("Registered {} flows", flows.len());
        Ok(InMemoryFlowRegistry {
            flows: Arc::new(flows),
        })
    }
}
