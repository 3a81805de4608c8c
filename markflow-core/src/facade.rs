//! Per-(subject type, field) convenience adapter over a [`Workflow`].

use crate::definition::Transition;
use crate::error::{ErrorTransition, WorkflowError};
use crate::marking::Marking;
use crate::registry::Registry;
use crate::subject::Subject;
use crate::workflow::{Context, Workflow};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure of [`SubjectWorkflow::apply_to`].
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The transition exists but is not enabled; carries the user-facing message.
    #[error(transparent)]
    Rejected(#[from] ErrorTransition),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl ApplyError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApplyError::Rejected(_) => "NOT_ENABLED",
            ApplyError::Workflow(e) => e.error_code(),
        }
    }
}

/// Named operations for one workflow bound to one subject field.
///
/// Every call forwards to the wrapped [`Workflow`].
#[derive(Debug, Clone)]
pub struct SubjectWorkflow {
    workflow: Arc<Workflow>,
}

impl SubjectWorkflow {
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self { workflow }
    }

    /// Resolves the workflow for `subject` from a registry.
    pub fn for_subject(
        registry: &Registry,
        subject: &dyn Subject,
        workflow_name: Option<&str>,
    ) -> Result<Self, WorkflowError> {
        registry.get(subject, workflow_name).map(Self::new)
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn marking(&self, subject: &dyn Subject) -> Result<Marking, WorkflowError> {
        self.workflow.get_marking(subject)
    }

    pub fn initialize(
        &self,
        subject: &mut dyn Subject,
        context: Context,
    ) -> Result<Marking, WorkflowError> {
        self.workflow.initialize(subject, context)
    }

    pub fn can_to(&self, subject: &dyn Subject, transition: &str) -> Result<bool, WorkflowError> {
        self.workflow.can(subject, transition)
    }

    /// Applies `transition`, turning a not-enabled failure into an [`ErrorTransition`].
    pub fn apply_to(
        &self,
        subject: &mut dyn Subject,
        transition: &str,
        context: Context,
    ) -> Result<Marking, ApplyError> {
        self.workflow
            .apply(subject, transition, context)
            .map_err(|e| match ErrorTransition::from_error(self.workflow.definition(), e) {
                Ok(rejected) => ApplyError::Rejected(rejected),
                Err(other) => ApplyError::Workflow(other),
            })
    }

    pub fn enabled_transitions<'w>(
        &'w self,
        subject: &dyn Subject,
    ) -> Result<Vec<&'w Transition>, WorkflowError> {
        self.workflow.enabled_transitions(subject)
    }

    pub fn enabled_transition<'w>(
        &'w self,
        subject: &dyn Subject,
        transition: &str,
    ) -> Result<Option<&'w Transition>, WorkflowError> {
        self.workflow.enabled_transition(subject, transition)
    }

    /// `can` for every distinct transition name, keyed by name.
    pub fn transition_flags(
        &self,
        subject: &dyn Subject,
    ) -> Result<BTreeMap<String, bool>, WorkflowError> {
        self.workflow
            .definition()
            .transition_names()
            .into_iter()
            .map(|name| Ok((name.to_string(), self.workflow.can(subject, name)?)))
            .collect()
    }
}
