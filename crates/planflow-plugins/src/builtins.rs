//! String functions registered under the `text` plugin.
//!
//! | Key            | Inputs                           | Outputs  |
//! |----------------|----------------------------------|----------|
//! | `text__echo`   | any                              | the same |
//! | `text__upper`  | `text`                           | `result` |
//! | `text__lower`  | `text`                           | `result` |
//! | `text__concat` | `left`, `right`, `separator`?    | `result` |
//! | `text__append` | `text`, `suffix`                 | `text`   |

use crate::registry::{handler, FunctionRegistry, ToolError};
use anyhow::anyhow;
use planflow_engine::Variables;
use planflow_protocol::FunctionDefinition;
use serde_json::json;
use tracing::info;

/// Plugin id of the builtin functions
pub const PLUGIN_ID: &str = "text";

fn requires(fields: &[&str]) -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({ "type": "string" })))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": fields,
    })
}

fn take(inputs: &mut Variables, name: &str) -> anyhow::Result<String> {
    inputs
        .remove(name)
        .ok_or_else(|| anyhow!("missing input '{}'", name))
}

fn single(name: &str, value: String) -> Variables {
    Variables::from([(name.to_string(), value)])
}

/// Register every builtin function
pub async fn register_builtins(registry: &FunctionRegistry) -> Result<(), ToolError> {
    registry
        .register(
            PLUGIN_ID,
            FunctionDefinition::new("echo", "Return the inputs unchanged"),
            handler(|inputs| async move { Ok::<_, anyhow::Error>(inputs) }),
        )
        .await?;

    registry
        .register(
            PLUGIN_ID,
            FunctionDefinition::new("upper", "Uppercase `text` into `result`")
                .with_schema(requires(&["text"])),
            handler(|mut inputs| async move {
                take(&mut inputs, "text").map(|text| single("result", text.to_uppercase()))
            }),
        )
        .await?;

    registry
        .register(
            PLUGIN_ID,
            FunctionDefinition::new("lower", "Lowercase `text` into `result`")
                .with_schema(requires(&["text"])),
            handler(|mut inputs| async move {
                take(&mut inputs, "text").map(|text| single("result", text.to_lowercase()))
            }),
        )
        .await?;

    registry
        .register(
            PLUGIN_ID,
            FunctionDefinition::new("concat", "Join `left` and `right` with an optional `separator`")
                .with_schema(requires(&["left", "right"])),
            handler(|mut inputs| async move {
                let left = take(&mut inputs, "left")?;
                let right = take(&mut inputs, "right")?;
                let separator = inputs.remove("separator").unwrap_or_default();
                Ok::<_, anyhow::Error>(single(
                    "result",
                    format!("{}{}{}", left, separator, right),
                ))
            }),
        )
        .await?;

    registry
        .register(
            PLUGIN_ID,
            FunctionDefinition::new("append", "Append `suffix` to `text` in place")
                .with_schema(requires(&["text", "suffix"])),
            handler(|mut inputs| async move {
                let mut text = take(&mut inputs, "text")?;
                text.push_str(&take(&mut inputs, "suffix")?);
                Ok::<_, anyhow::Error>(single("text", text))
            }),
        )
        .await?;

    info!("Registered {} builtin functions", registry.plugin_functions(PLUGIN_ID).await.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn registry() -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        register_builtins(&registry).await.unwrap();
        registry
    }

    #[tokio::test]
    async fn test_builtin_names() {
        assert_eq!(
            registry().await.names().await,
            vec![
                "text__append",
                "text__concat",
                "text__echo",
                "text__lower",
                "text__upper"
            ]
        );
    }

    #[tokio::test]
    async fn test_case_functions() {
        let registry = registry().await;
        assert_eq!(
            registry.call("text__upper", vars(&[("text", "MiXed")])).await.unwrap(),
            vars(&[("result", "MIXED")])
        );
        assert_eq!(
            registry.call("text__lower", vars(&[("text", "MiXed")])).await.unwrap(),
            vars(&[("result", "mixed")])
        );
    }

    #[tokio::test]
    async fn test_concat_with_and_without_separator() {
        let registry = registry().await;
        assert_eq!(
            registry
                .call("text__concat", vars(&[("left", "a"), ("right", "b")]))
                .await
                .unwrap(),
            vars(&[("result", "ab")])
        );
        assert_eq!(
            registry
                .call(
                    "text__concat",
                    vars(&[("left", "a"), ("right", "b"), ("separator", ", ")])
                )
                .await
                .unwrap(),
            vars(&[("result", "a, b")])
        );
    }

    #[tokio::test]
    async fn test_append_and_echo() {
        let registry = registry().await;
        assert_eq!(
            registry
                .call("text__append", vars(&[("text", "ab"), ("suffix", "c")]))
                .await
                .unwrap(),
            vars(&[("text", "abc")])
        );
        assert_eq!(
            registry.call("text__echo", vars(&[("x", "")])).await.unwrap(),
            vars(&[("x", "")])
        );
    }

    #[tokio::test]
    async fn test_missing_required_input_is_rejected_by_schema() {
        let registry = registry().await;
        let err = registry.call("text__upper", vars(&[])).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
