//! Test doubles shared by the executor tests

#![allow(dead_code)]

use async_trait::async_trait;
use planflow_engine::{
    EngineConfig, FlowExecutor, GoalCompletionChecker, InMemoryFlowRegistry, InvocationError,
    PluginFunctionInvoker, VariableView, Variables,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = Box<dyn Fn(&Variables, u32) -> Result<Variables, InvocationError> + Send + Sync>;

/// Invoker that answers from per-capability closures and logs every call.
///
/// Each handler receives the inputs and the 1-based call count for its
/// capability. Unknown capabilities answer `NotFound`.
#[derive(Default)]
pub struct ScriptedInvoker {
    handlers: HashMap<String, Handler>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Variables)>>,
    counts: Mutex<HashMap<String, u32>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, capability: &str, handler: F) -> Self
    where
        F: Fn(&Variables, u32) -> Result<Variables, InvocationError> + Send + Sync + 'static,
    {
        self.handlers.insert(capability.to_string(), Box::new(handler));
        self
    }

    /// Sleep before answering calls to `capability`
    pub fn delayed(mut self, capability: &str, delay: Duration) -> Self {
        self.delays.insert(capability.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn inputs_of(&self, capability: &str) -> Vec<Variables> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == capability)
            .map(|(_, inputs)| inputs.clone())
            .collect()
    }

    pub fn count(&self, capability: &str) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .get(capability)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PluginFunctionInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        capability_id: &str,
        inputs: &Variables,
    ) -> Result<Variables, InvocationError> {
        self.calls
            .lock()
            .unwrap()
            .push((capability_id.to_string(), inputs.clone()));
        let call = {
            let mut counts = self.counts.lock().unwrap();
            let count = counts.entry(capability_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(delay) = self.delays.get(capability_id) {
            tokio::time::sleep(*delay).await;
        }

        match self.handlers.get(capability_id) {
            Some(handler) => handler(inputs, call),
            None => Err(InvocationError::NotFound(capability_id.to_string())),
        }
    }
}

/// Checker satisfied once it has been asked `after` times; `None` never is.
pub struct CountingChecker {
    after: Option<u32>,
    checks: AtomicU32,
}

impl CountingChecker {
    pub fn never() -> Self {
        Self {
            after: None,
            checks: AtomicU32::new(0),
        }
    }

    pub fn after(checks: u32) -> Self {
        Self {
            after: Some(checks),
            checks: AtomicU32::new(0),
        }
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GoalCompletionChecker for CountingChecker {
    async fn is_satisfied(
        &self,
        _goal: &str,
        _variables: VariableView<'_>,
    ) -> Result<bool, InvocationError> {
        let seen = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.after.is_some_and(|after| seen >= after))
    }
}

/// Checker satisfied when the goal names a variable that is set
pub struct VariableSetChecker;

#[async_trait]
impl GoalCompletionChecker for VariableSetChecker {
    async fn is_satisfied(
        &self,
        goal: &str,
        variables: VariableView<'_>,
    ) -> Result<bool, InvocationError> {
        Ok(variables.contains(goal))
    }
}

/// Checker that always errors
pub struct BrokenChecker;

#[async_trait]
impl GoalCompletionChecker for BrokenChecker {
    async fn is_satisfied(
        &self,
        _goal: &str,
        _variables: VariableView<'_>,
    ) -> Result<bool, InvocationError> {
        Err(InvocationError::Failed("checker offline".into()))
    }
}

pub fn vars(pairs: &[(&str, &str)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn executor(
    invoker: Arc<ScriptedInvoker>,
    checker: Arc<dyn GoalCompletionChecker>,
    registry: InMemoryFlowRegistry,
    config: EngineConfig,
) -> FlowExecutor {
    FlowExecutor::new(invoker, checker, Arc::new(registry), config)
}

/// Checker that never answers
pub struct HangingChecker;

#[async_trait]
impl GoalCompletionChecker for HangingChecker {
    async fn is_satisfied(
        &self,
        _goal: &str,
        _variables: VariableView<'_>,
    ) -> Result<bool, InvocationError> {
        std::future::pending().await
    }
}
