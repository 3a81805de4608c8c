//! CLI configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MARKFLOW_CONFIG or --config)
//! 3. Environment variables

use markflow_core::event::DEFAULT_NAMESPACE;
use markflow_core::{DefinitionRaw, EventKind, WorkflowError};
use markflow_store::RepositoryError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where records live.
    pub storage: StorageConfig,
    /// Event dispatch settings.
    pub events: EventsConfig,
    /// Workflows to register.
    pub workflows: Vec<WorkflowConfig>,
}

impl Config {
    /// Loads configuration from an optional file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    ///
    /// Relative definition paths are resolved against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;

        if let Some(base) = path.parent() {
            for workflow in &mut config.workflows {
                if let Some(def_path) = &workflow.definition_path {
                    if def_path.is_relative() {
                        workflow.definition_path = Some(base.join(def_path));
                    }
                }
            }
        }
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.storage.apply_env_overrides();
        self.events.apply_env_overrides();
    }

    /// Checks the workflow entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for workflow in &self.workflows {
            if workflow.subject_type.is_empty() {
                return Err(ConfigError::Validation(
                    "workflow entry without subject_type".to_string(),
                ));
            }
            match (&workflow.definition, &workflow.definition_path) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "workflow '{}' needs exactly one of definition or definition_path",
                        workflow.name()
                    )))
                }
            }
            if !names.insert(workflow.name()) {
                return Err(ConfigError::Validation(format!(
                    "workflow '{}' configured twice",
                    workflow.name()
                )));
            }
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Record storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Records vanish when the process exits.
    Memory,
    /// Records are kept in a JSON file under the data directory.
    File,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Reject marking writes when the stored place changed since the record was read.
    pub conditional_updates: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("./data"),
            conditional_updates: true,
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("MARKFLOW_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(backend) = std::env::var("MARKFLOW_STORAGE") {
            match backend.to_lowercase().as_str() {
                "memory" => self.backend = StorageBackend::Memory,
                "file" => self.backend = StorageBackend::File,
                other => tracing::warn!("ignoring unknown MARKFLOW_STORAGE value '{}'", other),
            }
        }
    }

    /// Returns the records file path.
    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join("records.json")
    }
}

/// Event configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Event name namespace.
    pub namespace: String,
    /// Log every lifecycle event.
    pub trace: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            trace: false,
        }
    }
}

impl EventsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(namespace) = std::env::var("MARKFLOW_NAMESPACE") {
            if !namespace.is_empty() {
                self.namespace = namespace;
            }
        }

        if let Ok(trace) = std::env::var("MARKFLOW_TRACE_EVENTS") {
            self.trace = trace == "1" || trace.to_lowercase() == "true";
        }
    }
}

fn default_field() -> String {
    markflow_core::store::DEFAULT_FIELD.to_string()
}

/// One workflow bound to one field of one subject type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub subject_type: String,
    #[serde(default = "default_field")]
    pub field: String,
    /// Store the marking as a list of places. Defaults to true for
    /// `workflow` definitions and false for `state_machine` ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_state: Option<bool>,
    /// Inline definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<DefinitionRaw>,
    /// Definition file (`.json`, otherwise YAML).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_path: Option<PathBuf>,
    /// Lifecycle events to dispatch; all when absent. Guard is always dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_events: Option<Vec<EventKind>>,
    /// Fail instead of picking the first of several enabled same-named transitions.
    #[serde(default)]
    pub reject_ambiguous: bool,
}

impl WorkflowConfig {
    /// Registered workflow name.
    pub fn name(&self) -> String {
        format!("{}@{}", self.subject_type, self.field)
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{}': {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),

    #[error("workflow '{name}': {source}")]
    Workflow {
        name: String,
        #[source]
        source: WorkflowError,
    },

    #[error("storage: {0}")]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(
            config.storage.records_path(),
            PathBuf::from("./data/records.json")
        );
        assert_eq!(config.events.namespace, "workflow");
        assert!(config.workflows.is_empty());
    }

    #[test]
    fn test_parse_workflows() {
        let yaml = r#"
storage:
  backend: memory
events:
  namespace: app.workflow
workflows:
  - subject_type: article
    definition:
      places: [draft, review]
      transitions:
        - {name: submit, from: draft, to: review}
  - subject_type: article
    field: payment
    definition_path: payment.yaml
    dispatch_events: [completed]
"#;
        let dir = tempdir().unwrap();
        let path = dir.path().join("markflow.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.events.namespace, "app.workflow");
        assert_eq!(config.workflows.len(), 2);
        assert_eq!(config.workflows[0].name(), "article@status");
        assert_eq!(config.workflows[1].name(), "article@payment");
        assert_eq!(
            config.workflows[1].definition_path.as_deref(),
            Some(dir.path().join("payment.yaml").as_path())
        );
        assert_eq!(
            config.workflows[1].dispatch_events,
            Some(vec![EventKind::Completed])
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_duplicates_and_missing_definitions() {
        let mut config = Config::default();
        config.workflows.push(WorkflowConfig {
            subject_type: "task".to_string(),
            field: "status".to_string(),
            multi_state: None,
            definition: None,
            definition_path: None,
            dispatch_events: None,
            reject_ambiguous: false,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        config.workflows[0].definition_path = Some(PathBuf::from("task.yaml"));
        let duplicate = config.workflows[0].clone();
        config.workflows.push(duplicate);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("task@status"));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.yaml");
        let config = Config::default();
        config.save(&path).unwrap();

        let parsed = Config::from_file(&path).unwrap();
        assert_eq!(parsed.storage.data_dir, config.storage.data_dir);
        assert_eq!(parsed.events.namespace, config.events.namespace);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/markflow.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
