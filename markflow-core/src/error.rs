//! Core error types.

use crate::blocker::TransitionBlockerList;
use crate::definition::Definition;
use thiserror::Error;

/// Errors from the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid workflow definition: {reason}")]
    Configuration { reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("transition '{transition}' is not defined for workflow '{workflow}'")]
    UnknownTransition { workflow: String, transition: String },

    #[error("transition '{transition}' is not enabled for workflow '{workflow}'")]
    NotEnabled {
        workflow: String,
        transition: String,
        blockers: TransitionBlockerList,
    },

    #[error("transition '{transition}' has {count} enabled candidates in workflow '{workflow}'")]
    AmbiguousTransition {
        workflow: String,
        transition: String,
        count: usize,
    },

    #[error("marking persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("no workflow supports subject of type '{subject_type}'")]
    NoWorkflow { subject_type: String },

    #[error("{count} workflows support subject of type '{subject_type}', a workflow name is required")]
    AmbiguousWorkflow { subject_type: String, count: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl WorkflowError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        WorkflowError::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Persistence(e) if e.is_retryable())
    }

    /// Returns the blockers carried by a not-enabled failure.
    pub fn blockers(&self) -> Option<&TransitionBlockerList> {
        match self {
            WorkflowError::NotEnabled { blockers, .. } => Some(blockers),
            _ => None,
        }
    }

    /// Returns a stable error code suitable for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            WorkflowError::Configuration { .. } => "CONFIGURATION",
            WorkflowError::InvalidGuard { .. } => "CONFIGURATION",
            WorkflowError::UnknownTransition { .. } => "UNKNOWN_TRANSITION",
            WorkflowError::NotEnabled { .. } => "NOT_ENABLED",
            WorkflowError::AmbiguousTransition { .. } => "AMBIGUOUS_TRANSITION",
            WorkflowError::Persistence(_) => "PERSISTENCE",
            WorkflowError::NoWorkflow { .. } => "WORKFLOW_NOT_FOUND",
            WorkflowError::AmbiguousWorkflow { .. } => "WORKFLOW_AMBIGUOUS",
            WorkflowError::Json(_) => "BAD_REQUEST",
            WorkflowError::Yaml(_) => "BAD_REQUEST",
        }
    }
}

/// Errors raised by marking stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("subject has no identifier")]
    MissingIdentifier,

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("conflicting update on record {id}: {reason}")]
    Conflict { id: String, reason: String },

    #[error("subject does not support this marking store: {0}")]
    Unsupported(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Conflict { .. })
    }
}

/// A not-enabled transition failure with a human readable message.
///
/// The message comes from the failed transition's `error` metadata, falling
/// back to a generic one when no transition of that name declares it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ErrorTransition {
    workflow: String,
    transition: String,
    message: String,
    blockers: TransitionBlockerList,
}

impl ErrorTransition {
    /// Builds the rejection from its parts, resolving the message against the definition.
    pub fn new(
        definition: &Definition,
        workflow: impl Into<String>,
        transition: impl Into<String>,
        blockers: TransitionBlockerList,
    ) -> Self {
        let transition = transition.into();
        // The last declared transition with the name decides the message.
        let message = definition
            .transitions()
            .iter()
            .rev()
            .find(|t| t.name() == transition)
            .and_then(|t| definition.metadata().transition_error(t))
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("cannot transition to \"{}\"", transition));

        Self {
            workflow: workflow.into(),
            transition,
            message,
            blockers,
        }
    }

    /// Converts a [`WorkflowError::NotEnabled`]; any other error is handed back unchanged.
    pub fn from_error(definition: &Definition, err: WorkflowError) -> Result<Self, WorkflowError> {
        match err {
            WorkflowError::NotEnabled {
                workflow,
                transition,
                blockers,
            } => Ok(Self::new(definition, workflow, transition, blockers)),
            other => Err(other),
        }
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn transition(&self) -> &str {
        &self.transition
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn blockers(&self) -> &TransitionBlockerList {
        &self.blockers
    }
}
