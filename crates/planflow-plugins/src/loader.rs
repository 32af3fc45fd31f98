use planflow_engine::{FlowRegistryBuilder, InMemoryFlowRegistry, ValidationError};
use planflow_protocol::FlowDefinition;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const MAX_DEPTH: usize = 5;

/// Errors that can occur during flow loading
#[derive(Debug, Error)]
pub enum LoaderError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory walk failed
    #[error("Failed to scan flow directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// Path traversal detected
    #[error("Path traversal detected: file '{0}' is outside allowed directory")]
    PathTraversal(PathBuf),

    /// Failed to parse TOML
    #[error("Failed to parse TOML in {path}: {source}")]
    ParseToml {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// Failed to parse YAML
    #[error("Failed to parse YAML in {path}: {source}")]
    ParseYaml {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: serde_yaml::Error,
    },

    /// Failed to parse JSON
    #[error("Failed to parse JSON in {path}: {source}")]
    ParseJson {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// File extension is not a flow format
    #[error("Unsupported flow file {0}, expected .toml, .yaml, .yml or .json")]
    UnsupportedFormat(PathBuf),

    /// Path canonicalization failed
    #[error("Failed to canonicalize path {path}: {source}")]
    Canonicalization {
        /// The path that failed
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Loaded flows do not form a valid registry
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A flow definition parsed from disk
#[derive(Debug, Clone)]
pub struct LoadedFlow {
    /// File the flow came from
    pub path: PathBuf,
    /// Parsed definition
    pub definition: FlowDefinition,
}

/// Loader for file-based flow definitions
#[derive(Debug, Clone)]
pub struct FlowLoader {
    root_path: PathBuf,
}

impl FlowLoader {
    /// Create a new flow loader for the given directory
    pub fn new(root_path: impl AsRef<Path>) -> Self {
        Self {
            root_path: root_path.as_ref().to_path_buf(),
        }
    }

    /// Directory this loader scans
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Parse every flow file under the root directory, in path order.
    ///
    /// Returns the flows that parsed and the errors for files that did not.
    /// Fails outright only when the root itself cannot be read.
    pub fn scan(&self) -> Result<(Vec<LoadedFlow>, Vec<LoaderError>), LoaderError> {
        let canonical_root =
            self.root_path
                .canonicalize()
                .map_err(|e| LoaderError::Canonicalization {
                    path: self.root_path.clone(),
                    source: e,
                })?;

        info!("Scanning flows from: {}", self.root_path.display());
        let mut flows = Vec::new();
        let mut errors = Vec::new();

        for entry in WalkDir::new(&canonical_root)
            .follow_links(false)
            .max_depth(MAX_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !should_ignore_dir_entry(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(LoaderError::Walk(e));
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !is_flow_file(path) {
                continue;
            }
            match self.load_flow_file(&canonical_root, path) {
                Ok(definition) => {
                    debug!(flow = %definition.name, path = %path.display(), "Loaded flow");
                    flows.push(LoadedFlow {
                        path: path.to_path_buf(),
                        definition,
                    });
                }
                Err(e) => errors.push(e),
            }
        }

        info!("Loaded {} flows ({} files rejected)", flows.len(), errors.len());
        Ok((flows, errors))
    }

    /// Load every parseable flow, skipping bad files with a warning
    pub fn load(&self) -> Result<Vec<LoadedFlow>, LoaderError> {
        let (flows, errors) = self.scan()?;
        for e in &errors {
            warn!("Skipping flow file: {}", e);
        }
        Ok(flows)
    }

    /// Load every flow and validate them together as a registry
    pub fn load_registry(&self) -> Result<InMemoryFlowRegistry, LoaderError> {
        let flows = self.load()?;
        let registry = FlowRegistryBuilder::default()
            .extend(flows.into_iter().map(|f| f.definition))
            .build()?;
        Ok(registry)
    }

    fn load_flow_file(
        &self,
        canonical_root: &Path,
        path: &Path,
    ) -> Result<FlowDefinition, LoaderError> {
        let canonical_path = path
            .canonicalize()
            .map_err(|e| LoaderError::Canonicalization {
                path: path.to_path_buf(),
                source: e,
            })?;

        if !canonical_path.starts_with(canonical_root) {
            return Err(LoaderError::PathTraversal(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(&canonical_path)?;
        parse_flow(&canonical_path, &content)
    }
}

/// Parse flow `content` in the format implied by `path`'s extension
pub fn parse_flow(path: &Path, content: &str) -> Result<FlowDefinition, LoaderError> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(content).map_err(|e| LoaderError::ParseToml {
            path: path.to_path_buf(),
            source: e,
        }),
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(content).map_err(|e| LoaderError::ParseYaml {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Some("json") => serde_json::from_str(content).map_err(|e| LoaderError::ParseJson {
            path: path.to_path_buf(),
            source: e,
        }),
        _ => Err(LoaderError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn is_flow_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("toml" | "yaml" | "yml" | "json")
    )
}

fn should_ignore_dir_entry(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() || entry.depth() == 0 {
        return false;
    }

    let name = entry.file_name().to_string_lossy();
    name.starts_with('.')
        || matches!(
            name.as_ref(),
            "node_modules" | "dist" | "build" | "target" | "__pycache__"
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use planflow_engine::FlowRegistry;
    use std::fs;

    const GREET_TOML: &str = r#"
name = "greet"

[[steps]]
id = "shout"
type = "function"
capability = "text__upper"
inputs = ["text"]
outputs = ["result"]
"#;

    const WRAP_YAML: &str = r#"
name: wrap
steps:
  - id: inner
    type: reference
    flow: greet
    inputs:
      text: name
    outputs:
      greeting: result
"#;

    #[test]
    fn test_loads_all_formats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::write(root.join("greet.toml"), GREET_TOML).expect("write toml");
        fs::create_dir_all(root.join("nested")).expect("mkdir");
        fs::write(root.join("nested/wrap.yaml"), WRAP_YAML).expect("write yaml");
        fs::write(
            root.join("echo.json"),
            r#"{"name": "echo", "steps": [{"id": "e", "type": "function", "capability": "text__echo"}]}"#,
        )
        .expect("write json");
        fs::write(root.join("README.md"), "not a flow").expect("write md");

        let flows = FlowLoader::new(root).load().expect("load flows");
        let names: Vec<&str> = flows.iter().map(|f| f.definition.name.as_str()).collect();

        assert_eq!(names, vec!["echo", "greet", "wrap"]);
    }

    #[test]
    fn test_loader_skips_ignored_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::write(root.join("greet.toml"), GREET_TOML).expect("write valid");
        for ignored in ["node_modules/pkg", ".git", "target"] {
            fs::create_dir_all(root.join(ignored)).expect("mkdir");
            fs::write(root.join(ignored).join("broken.toml"), "not = [valid").expect("write");
        }

        let flows = FlowLoader::new(root).load().expect("load flows");
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].definition.name, "greet");
    }

    #[test]
    fn test_malformed_file_does_not_abort_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("bad.yaml"), "name: [unclosed").expect("write");
        fs::write(dir.path().join("greet.toml"), GREET_TOML).expect("write");

        let loader = FlowLoader::new(dir.path());
        let (flows, errors) = loader.scan().expect("scan");
        assert_eq!(flows.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], LoaderError::ParseYaml { .. }));

        let flows = loader.load().expect("load");
        assert_eq!(flows[0].definition.name, "greet");
    }

    #[test]
    fn test_missing_root() {
        let err = FlowLoader::new("/definitely/not/here").load().unwrap_err();
        assert!(matches!(err, LoaderError::Canonicalization { .. }));
    }

    #[test]
    fn test_load_registry_resolves_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a_wrap.yaml"), WRAP_YAML).expect("write");
        fs::write(dir.path().join("b_greet.toml"), GREET_TOML).expect("write");

        let registry = FlowLoader::new(dir.path()).load_registry().expect("registry");
        assert_eq!(registry.names(), vec!["greet", "wrap"]);
        assert!(registry.resolve("wrap").is_ok());
    }

    #[test]
    fn test_load_registry_reports_validation_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("wrap.yaml"), WRAP_YAML).expect("write");

        let err = FlowLoader::new(dir.path()).load_registry().unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Validation(ValidationError::UnresolvedReference { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_outside_root_is_rejected() {
        let outside = tempfile::tempdir().expect("tempdir");
        fs::write(outside.path().join("greet.toml"), GREET_TOML).expect("write");

        let dir = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink(
            outside.path().join("greet.toml"),
            dir.path().join("linked.toml"),
        )
        .expect("symlink");

        let (flows, errors) = FlowLoader::new(dir.path()).scan().expect("scan");
        assert!(flows.is_empty());
        assert!(matches!(errors[..], [LoaderError::PathTraversal(_)]));
    }
}
