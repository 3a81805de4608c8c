//! Lookup of the workflow(s) that apply to a subject.

use crate::error::WorkflowError;
use crate::subject::Subject;
use crate::workflow::Workflow;
use parking_lot::RwLock;
use std::sync::Arc;

/// Decides whether a registered workflow applies to a subject.
pub trait SupportStrategy: Send + Sync {
    fn supports(&self, workflow: &Workflow, subject: &dyn Subject) -> bool;
}

/// Supports subjects whose [`Subject::subject_type`] equals a fixed name.
#[derive(Debug, Clone)]
pub struct InstanceOfSupportStrategy {
    subject_type: String,
}

impl InstanceOfSupportStrategy {
    pub fn new(subject_type: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
        }
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }
}

impl SupportStrategy for InstanceOfSupportStrategy {
    fn supports(&self, _workflow: &Workflow, subject: &dyn Subject) -> bool {
        subject.subject_type() == self.subject_type
    }
}

impl<F> SupportStrategy for F
where
    F: Fn(&Workflow, &dyn Subject) -> bool + Send + Sync,
{
    fn supports(&self, workflow: &Workflow, subject: &dyn Subject) -> bool {
        self(workflow, subject)
    }
}

struct Entry {
    workflow: Arc<Workflow>,
    strategy: Box<dyn SupportStrategy>,
}

/// Registered (workflow, strategy) pairs.
///
/// Populated at startup; registration takes a write lock so it is also safe
/// while lookups are in flight.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<Vec<Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow. Workflow names must be unique.
    pub fn add_workflow(
        &self,
        workflow: Arc<Workflow>,
        strategy: impl SupportStrategy + 'static,
    ) -> Result<(), WorkflowError> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.workflow.name() == workflow.name()) {
            return Err(WorkflowError::configuration(format!(
                "workflow '{}' is already registered",
                workflow.name()
            )));
        }

        tracing::debug!(workflow = %workflow.name(), "workflow registered");
        entries.push(Entry {
            workflow,
            strategy: Box::new(strategy),
        });
        Ok(())
    }

    /// Returns the single workflow supporting `subject`, narrowed by name when given.
    pub fn get(
        &self,
        subject: &dyn Subject,
        workflow_name: Option<&str>,
    ) -> Result<Arc<Workflow>, WorkflowError> {
        let mut matches = self.matching(subject, workflow_name);
        match matches.len() {
            0 => Err(WorkflowError::NoWorkflow {
                subject_type: subject.subject_type().to_string(),
            }),
            1 => Ok(matches.remove(0)),
            count => Err(WorkflowError::AmbiguousWorkflow {
                subject_type: subject.subject_type().to_string(),
                count,
            }),
        }
    }

    pub fn has(&self, subject: &dyn Subject, workflow_name: Option<&str>) -> bool {
        !self.matching(subject, workflow_name).is_empty()
    }

    /// Every workflow supporting `subject`, in registration order.
    pub fn all(&self, subject: &dyn Subject) -> Vec<Arc<Workflow>> {
        self.matching(subject, None)
    }

    /// Looks a workflow up by name alone.
    pub fn by_name(&self, workflow_name: &str) -> Option<Arc<Workflow>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.workflow.name() == workflow_name)
            .map(|e| e.workflow.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.workflow.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn matching(&self, subject: &dyn Subject, workflow_name: Option<&str>) -> Vec<Arc<Workflow>> {
        self.entries
            .read()
            .iter()
            .filter(|e| workflow_name.map_or(true, |n| e.workflow.name() == n))
            .filter(|e| e.strategy.supports(&e.workflow, subject))
            .map(|e| e.workflow.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Definition;
    use crate::store::FieldMarkingStore;
    use crate::subject::Record;
    use serde_json::json;

    fn workflow(name: &str, field: &str) -> Arc<Workflow> {
        let def = Arc::new(
            Definition::from_json(&json!({
                "places": ["new", "done"],
                "transitions": [{"name": "finish", "from": "new", "to": "done"}]
            }))
            .unwrap(),
        );
        let store = Arc::new(FieldMarkingStore::new(field, def.places().iter().cloned()));
        Arc::new(Workflow::new(def, store, None, name))
    }

    #[test]
    fn test_lookup_by_subject_type() {
        let registry = Registry::new();
        registry
            .add_workflow(
                workflow("task@status", "status"),
                InstanceOfSupportStrategy::new("task"),
            )
            .unwrap();

        let task = Record::new("task");
        assert_eq!(registry.get(&task, None).unwrap().name(), "task@status");
        assert!(registry.has(&task, Some("task@status")));

        let note = Record::new("note");
        assert!(!registry.has(&note, None));
        assert!(matches!(
            registry.get(&note, None),
            Err(WorkflowError::NoWorkflow { .. })
        ));
    }

    #[test]
    fn test_ambiguous_lookup_needs_name() {
        let registry = Registry::new();
        registry
            .add_workflow(
                workflow("order@status", "status"),
                InstanceOfSupportStrategy::new("order"),
            )
            .unwrap();
        registry
            .add_workflow(
                workflow("order@payment", "payment"),
                InstanceOfSupportStrategy::new("order"),
            )
            .unwrap();

        let order = Record::new("order");
        assert!(matches!(
            registry.get(&order, None),
            Err(WorkflowError::AmbiguousWorkflow { count: 2, .. })
        ));
        assert_eq!(
            registry.get(&order, Some("order@payment")).unwrap().name(),
            "order@payment"
        );
        assert!(matches!(
            registry.get(&order, Some("order@shipping")),
            Err(WorkflowError::NoWorkflow { .. })
        ));
        assert_eq!(registry.all(&order).len(), 2);
        assert_eq!(registry.names(), vec!["order@status", "order@payment"]);
    }

    #[test]
    fn test_closure_strategy_and_duplicate_names() {
        let registry = Registry::new();
        registry
            .add_workflow(
                workflow("premium@status", "status"),
                |_: &Workflow, s: &dyn Subject| s.field("tier") == Some(json!("premium")),
            )
            .unwrap();

        let plain = Record::new("account");
        let premium = Record::new("account").with_field("tier", "premium");
        assert!(!registry.has(&plain, None));
        assert!(registry.has(&premium, None));

        let err = registry
            .add_workflow(
                workflow("premium@status", "status"),
                InstanceOfSupportStrategy::new("account"),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration { .. }));
        assert_eq!(registry.len(), 1);
        assert!(registry.by_name("premium@status").is_some());
    }
}
