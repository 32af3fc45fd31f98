use anyhow::Result;
use async_trait::async_trait;
use jsonschema::Validator;
use planflow_engine::{InvocationError, PluginFunctionInvoker, Variables};
use planflow_protocol::FunctionDefinition;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A handler function for a plugin function.
///
/// Receives the step's input variables and returns its output variables.
pub type FunctionHandler =
    Arc<dyn Fn(Variables) -> Pin<Box<dyn Future<Output = Result<Variables>> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`FunctionHandler`]
pub fn handler<F, Fut>(f: F) -> FunctionHandler
where
    F: Fn(Variables) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Variables>> + Send + 'static,
{
    Arc::new(move |inputs| Box::pin(f(inputs)))
}

/// Registry for all available plugin functions across all plugins.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: Arc<RwLock<HashMap<String, RegisteredFunction>>>,
}

/// A registered function with its schema validator
struct RegisteredFunction {
    definition: FunctionDefinition,
    handler: FunctionHandler,
    plugin_id: String,
    validator: Validator,
}

/// Errors that can occur during function operations
#[derive(Debug, Error)]
pub enum ToolError {
    /// Function not found
    #[error("Function not found: {0}")]
    NotFound(String),
    /// Invalid arguments provided
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// Schema compilation failed
    #[error("Schema error: {0}")]
    SchemaError(String),
    /// Handler execution failed
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl From<ToolError> for InvocationError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(name) => InvocationError::NotFound(name),
            ToolError::InvalidArguments(msg) => InvocationError::InvalidArguments(msg),
            ToolError::SchemaError(msg) => InvocationError::InvalidArguments(msg),
            ToolError::ExecutionError(msg) => InvocationError::Failed(msg),
        }
    }
}

impl FunctionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry key of `name` within `plugin_id`
    pub fn key(plugin_id: &str, name: &str) -> String {
        format!("{}__{}", plugin_id, name)
    }

    fn compile_schema(schema: &Value) -> Result<Validator, ToolError> {
        jsonschema::validator_for(schema).map_err(|e| ToolError::SchemaError(e.to_string()))
    }

    /// Register a function under `plugin__name`.
    /// Fails if the input schema does not compile. Replaces an existing
    /// function with the same key.
    pub async fn register(
        &self,
        plugin_id: &str,
        definition: FunctionDefinition,
        handler: FunctionHandler,
    ) -> Result<(), ToolError> {
        let validator = match Self::compile_schema(&definition.input_schema) {
            Ok(validator) => validator,
            Err(e) => {
                warn!(
                    "Failed to compile schema for function {}: {}. Function cannot be registered.",
                    definition.name, e
                );
                return Err(e);
            }
        };

        let key = Self::key(plugin_id, &definition.name);
        debug!("Registered function: {}", key);
        let mut functions = self.functions.write().await;
        functions.insert(
            key,
            RegisteredFunction {
                definition,
                handler,
                plugin_id: plugin_id.to_string(),
                validator,
            },
        );
        Ok(())
    }

    /// Registry keys of all functions, sorted
    pub async fn names(&self) -> Vec<String> {
        let functions = self.functions.read().await;
        let mut names: Vec<String> = functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions of all functions registered by `plugin_id`
    pub async fn plugin_functions(&self, plugin_id: &str) -> Vec<FunctionDefinition> {
        let functions = self.functions.read().await;
        let mut defs: Vec<FunctionDefinition> = functions
            .values()
            .filter(|f| f.plugin_id == plugin_id)
            .map(|f| f.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Get a function's definition by key
    pub async fn get(&self, key: &str) -> Option<FunctionDefinition> {
        let functions = self.functions.read().await;
        functions.get(key).map(|f| f.definition.clone())
    }

    /// Unregister a function by key
    pub async fn unregister(&self, key: &str) -> bool {
        let mut functions = self.functions.write().await;
        functions.remove(key).is_some()
    }

    /// Number of registered functions
    pub async fn len(&self) -> usize {
        self.functions.read().await.len()
    }

    /// Whether no functions are registered
    pub async fn is_empty(&self) -> bool {
        self.functions.read().await.is_empty()
    }

    fn validate_args(key: &str, function: &RegisteredFunction, args: &Value) -> Result<(), ToolError> {
        let errors: Vec<String> = function
            .validator
            .iter_errors(args)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            return Ok(());
        }
        let error_msg = errors.join("; ");
        warn!("Validation failed for function {}: {}", key, error_msg);
        Err(ToolError::InvalidArguments(error_msg))
    }

    /// Call a function by key (`plugin__name`).
    /// Validates the inputs, as a JSON object of strings, before calling.
    pub async fn call(&self, key: &str, inputs: Variables) -> Result<Variables, ToolError> {
        let handler = {
            let functions = self.functions.read().await;
            let function = functions
                .get(key)
                .ok_or_else(|| ToolError::NotFound(key.to_string()))?;

            let args = serde_json::to_value(&inputs)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
            Self::validate_args(key, function, &args)?;
            Arc::clone(&function.handler)
        };

        handler(inputs)
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}

#[async_trait]
impl PluginFunctionInvoker for FunctionRegistry {
    async fn invoke(
        &self,
        capability_id: &str,
        inputs: &Variables,
    ) -> Result<Variables, InvocationError> {
        self.call(capability_id, inputs.clone())
            .await
            .map_err(InvocationError::from)
    }
}
