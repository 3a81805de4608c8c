//! Builds the workflow registry and record storage from configuration.

use crate::config::{Config, ConfigError, StorageBackend, WorkflowConfig};
use markflow_core::{
    CandidatePolicy, Definition, EventKind, InstanceOfSupportStrategy, ListenerRegistry, Registry,
    Subject, Workflow, WorkflowType,
};
use markflow_store::{InMemoryRepository, JsonFileRepository, RecordMarkingStore, RecordRepository};
use std::path::Path;
use std::sync::Arc;

/// Everything the commands need.
pub struct Runtime {
    pub registry: Registry,
    pub repository: Arc<dyn RecordRepository>,
    pub listeners: Arc<ListenerRegistry>,
}

impl Runtime {
    /// Builds the runtime described by `config`.
    pub fn load(config: &Config) -> Result<Self, ConfigError> {
        let repository: Arc<dyn RecordRepository> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryRepository::new()),
            StorageBackend::File => {
                Arc::new(JsonFileRepository::open(config.storage.records_path())?)
            }
        };

        let listeners = Arc::new(ListenerRegistry::with_namespace(&config.events.namespace));
        if config.events.trace {
            register_trace_listeners(&listeners);
        }

        let registry = Registry::new();
        for entry in &config.workflows {
            let workflow = build_workflow(entry, config, &repository, &listeners)?;
            registry
                .add_workflow(
                    Arc::new(workflow),
                    InstanceOfSupportStrategy::new(&entry.subject_type),
                )
                .map_err(|source| ConfigError::Workflow {
                    name: entry.name(),
                    source,
                })?;
        }

        tracing::info!(
            "Loaded {} workflow(s), storage: {:?}",
            registry.len(),
            config.storage.backend
        );

        Ok(Self {
            registry,
            repository,
            listeners,
        })
    }
}

/// Reads a definition file: `.json` as JSON, anything else as YAML.
pub fn load_definition(path: &Path) -> Result<Definition, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
            .and_then(|json| {
                Definition::from_json(&json).map_err(|source| ConfigError::Workflow {
                    name: path.display().to_string(),
                    source,
                })
            })
    } else {
        Definition::from_yaml(&content).map_err(|source| ConfigError::Workflow {
            name: path.display().to_string(),
            source,
        })
    }
}

fn build_workflow(
    entry: &WorkflowConfig,
    config: &Config,
    repository: &Arc<dyn RecordRepository>,
    listeners: &Arc<ListenerRegistry>,
) -> Result<Workflow, ConfigError> {
    let name = entry.name();
    let definition = match (&entry.definition, &entry.definition_path) {
        (Some(raw), _) => Definition::from_raw(raw.clone()).map_err(|source| {
            ConfigError::Workflow {
                name: name.clone(),
                source,
            }
        })?,
        (None, Some(path)) => load_definition(path)?,
        (None, None) => {
            return Err(ConfigError::Validation(format!(
                "workflow '{}' has no definition",
                name
            )))
        }
    };

    let multi_state = entry
        .multi_state
        .unwrap_or(definition.kind() == WorkflowType::Workflow);
    let store = RecordMarkingStore::new(
        repository.clone(),
        entry.field.clone(),
        definition.places().iter().cloned(),
    )
    .multi_state(multi_state)
    .conditional(config.storage.conditional_updates);

    let policy = if entry.reject_ambiguous {
        CandidatePolicy::RejectAmbiguous
    } else {
        CandidatePolicy::FirstEnabled
    };

    tracing::debug!(
        workflow = %name,
        checksum = %definition.checksum(),
        places = definition.places().len(),
        transitions = definition.transitions().len(),
        "definition loaded"
    );

    let mut workflow = Workflow::new(
        Arc::new(definition),
        Arc::new(store),
        Some(listeners.clone()),
        name,
    )
    .with_candidate_policy(policy);
    if let Some(kinds) = &entry.dispatch_events {
        workflow = workflow.with_events_to_dispatch(kinds.iter().copied());
    }
    Ok(workflow)
}

/// Logs every lifecycle event at info level.
pub fn register_trace_listeners(listeners: &ListenerRegistry) {
    for kind in EventKind::ALL {
        let namespace = listeners.namespace().to_string();
        listeners.listen_global(kind, move |event| {
            tracing::info!(
                "{}.{}.{} subject={} transition={} marking={}",
                namespace,
                event.workflow_name(),
                event.kind(),
                event.subject().subject_id().unwrap_or_default(),
                event.transition().map(|t| t.name()).unwrap_or("-"),
                event.marking()
            );
        });
    }
}
