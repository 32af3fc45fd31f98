//! Engine limits and defaults

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Limits applied to every run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Step executions allowed across the whole call tree of one run
    pub max_total_steps: u64,
    /// Frames allowed on the call stack, root included
    pub max_call_depth: usize,
    /// Timeout for each goal check, and for each function step attempt
    /// that sets none of its own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_step_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_total_steps: 1_000,
            max_call_depth: 16,
            default_step_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Parse from TOML; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Reject limits that would stop every run before its first step
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_total_steps == 0 {
            return Err(ConfigError::Invalid(
                "max_total_steps must be at least 1".to_string(),
            ));
        }
        if self.max_call_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_call_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the global step budget
    pub fn with_max_total_steps(mut self, max_total_steps: u64) -> Self {
        self.max_total_steps = max_total_steps;
        self
    }

    /// Set the call depth limit
    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Set the default per-attempt timeout
    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Default per-attempt timeout, if any
    pub fn default_step_timeout(&self) -> Option<Duration> {
        self.default_step_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_total_steps, 1_000);
        assert_eq!(config.max_call_depth, 16);
        assert!(config.default_step_timeout().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("max_call_depth = 4\n").unwrap();
        assert_eq!(
            config,
            EngineConfig {
                max_total_steps: 1_000,
                max_call_depth: 4,
                default_step_timeout_ms: None,
            }
        );
    }

    #[test]
    fn test_zero_budget_rejected() {
        let err = EngineConfig::from_toml_str("max_total_steps = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = EngineConfig::from_toml_str("max_total_steps = \"many\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "max_total_steps = 50\ndefault_step_timeout_ms = 2500\n",
        )
        .expect("write config");

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_total_steps, 50);
        assert_eq!(
            config.default_step_timeout(),
            Some(Duration::from_millis(2_500))
        );
    }
}
