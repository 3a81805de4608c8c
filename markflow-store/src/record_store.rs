//! Marking store backed by a record repository.

use crate::repository::{Precondition, RecordRepository};
use markflow_core::{Context, FieldMarkingStore, Marking, MarkingStore, StoreError, Subject};
use std::sync::Arc;

/// Reads and writes the marking of the persisted record a subject stands for.
///
/// The subject is located by [`Subject::subject_id`]. A write stores the new
/// place together with the transition context in one repository update, and
/// only then mirrors the place onto the in-memory subject.
pub struct RecordMarkingStore {
    repository: Arc<dyn RecordRepository>,
    codec: FieldMarkingStore,
    conditional: bool,
}

impl RecordMarkingStore {
    pub fn new<I, S>(repository: Arc<dyn RecordRepository>, field: impl Into<String>, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repository,
            codec: FieldMarkingStore::new(field, places),
            conditional: false,
        }
    }

    pub fn multi_state(mut self, multi_state: bool) -> Self {
        self.codec = self.codec.multi_state(multi_state);
        self
    }

    /// Makes every write conditional on the stored field still holding the
    /// marking the engine read before the transition.
    pub fn conditional(mut self, conditional: bool) -> Self {
        self.conditional = conditional;
        self
    }

    pub fn field(&self) -> &str {
        self.codec.field()
    }

    pub fn repository(&self) -> &Arc<dyn RecordRepository> {
        &self.repository
    }

    /// Checks that the stored field still decodes to `previous` and pins the
    /// raw value read, so a write racing in after this check also conflicts.
    fn expect_marking(&self, id: &str, previous: &Marking) -> Result<Precondition, StoreError> {
        let field = self.codec.field();
        let record = self
            .repository
            .find(id)?
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        let stored = record.fields.get(field).cloned();

        let current = self.codec.marking_from_value(stored.as_ref());
        if &current != previous {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                reason: format!(
                    "marking in field '{}' changed from {} to {}",
                    field, previous, current
                ),
            });
        }

        Ok(Precondition::FieldEquals {
            field: field.to_string(),
            value: stored,
        })
    }
}

fn subject_key(subject: &dyn Subject) -> Result<String, StoreError> {
    subject
        .subject_id()
        .filter(|id| !id.is_empty())
        .ok_or(StoreError::MissingIdentifier)
}

impl MarkingStore for RecordMarkingStore {
    fn get_marking(&self, subject: &dyn Subject) -> Result<Marking, StoreError> {
        let id = subject_key(subject)?;
        let record = self
            .repository
            .find(&id)?
            .ok_or(StoreError::RecordNotFound(id))?;
        Ok(self.codec.marking_from_value(record.fields.get(self.codec.field())))
    }

    /// Without a marking read by the engine, the subject's own copy of the
    /// field stands in for it.
    fn set_marking(
        &self,
        subject: &mut dyn Subject,
        marking: &Marking,
        context: &Context,
    ) -> Result<(), StoreError> {
        let previous = self
            .codec
            .marking_from_value(subject.field(self.codec.field()).as_ref());
        self.replace_marking(subject, &previous, marking, context)
    }

    fn replace_marking(
        &self,
        subject: &mut dyn Subject,
        previous: &Marking,
        marking: &Marking,
        context: &Context,
    ) -> Result<(), StoreError> {
        if !self.codec.is_multi_state() && marking.len() > 1 {
            return Err(StoreError::Unsupported(format!(
                "field '{}' holds a single place, marking {} has {}",
                self.codec.field(),
                marking,
                marking.len()
            )));
        }

        let id = subject_key(subject)?;
        let field = self.codec.field();
        let value = self.codec.value_from_marking(marking);

        let mut changes = context.clone();
        changes.insert(field.to_string(), value.clone());

        let precondition = if self.conditional {
            self.expect_marking(&id, previous)?
        } else {
            Precondition::None
        };

        let record = self.repository.update(&id, &changes, &precondition)?;
        tracing::debug!(id = %id, version = record.version, marking = %marking, "record marking stored");

        subject.set_field(field, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use markflow_core::{Definition, Record, Workflow, WorkflowError};
    use serde_json::{json, Map};

    const PLACES: [&str; 3] = ["draft", "review", "published"];

    fn repository() -> Arc<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::new());
        let mut fields = Map::new();
        fields.insert("status".to_string(), json!("draft"));
        repo.insert("article", Some("a-1".to_string()), fields).unwrap();
        repo
    }

    #[test]
    fn test_get_marking_by_primary_key() {
        let repo = repository();
        let store = RecordMarkingStore::new(repo, "status", PLACES);

        // The in-memory copy is stale; the repository is the truth.
        let subject = Record::new("article").with_id("a-1").with_field("status", "review");
        assert_eq!(
            store.get_marking(&subject).unwrap(),
            Marking::from_places(["draft"])
        );

        let missing = Record::new("article").with_id("a-404");
        assert!(matches!(
            store.get_marking(&missing),
            Err(StoreError::RecordNotFound(_))
        ));
        assert!(matches!(
            store.get_marking(&Record::new("article")),
            Err(StoreError::MissingIdentifier)
        ));
    }

    #[test]
    fn test_set_marking_merges_context_then_mirrors() {
        let repo = repository();
        let store = RecordMarkingStore::new(repo.clone(), "status", PLACES);
        let mut subject = repo.find("a-1").unwrap().unwrap().to_record();

        let mut context = Context::new();
        context.insert("reviewer".to_string(), json!("bob"));
        store
            .set_marking(&mut subject, &Marking::from_places(["review"]), &context)
            .unwrap();

        let stored = repo.find("a-1").unwrap().unwrap();
        assert_eq!(stored.fields["status"], "review");
        assert_eq!(stored.fields["reviewer"], "bob");
        assert_eq!(stored.version, 2);
        assert_eq!(subject.fields["status"], "review");
        assert!(!subject.fields.contains_key("reviewer"));
    }

    #[test]
    fn test_conditional_write_detects_stale_subject() {
        let repo = repository();
        let store = RecordMarkingStore::new(repo.clone(), "status", PLACES).conditional(true);
        let mut first = repo.find("a-1").unwrap().unwrap().to_record();
        let mut second = first.clone();

        store
            .set_marking(&mut first, &Marking::from_places(["review"]), &Context::new())
            .unwrap();
        let err = store
            .set_marking(&mut second, &Marking::from_places(["review"]), &Context::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(err.is_retryable());
        assert_eq!(second.fields["status"], "draft");
    }

    #[test]
    fn test_conditional_write_uses_marking_read_from_repository() {
        let repo = repository();
        let store = RecordMarkingStore::new(repo.clone(), "status", PLACES).conditional(true);

        // Located by primary key only: the subject carries no status field.
        let mut by_key = Record::new("article").with_id("a-1");
        store
            .replace_marking(
                &mut by_key,
                &Marking::from_places(["draft"]),
                &Marking::from_places(["review"]),
                &Context::new(),
            )
            .unwrap();
        assert_eq!(repo.find("a-1").unwrap().unwrap().fields["status"], "review");

        // A stale in-memory copy does not matter, the marking read does.
        let mut stale = Record::new("article")
            .with_id("a-1")
            .with_field("status", "published");
        store
            .replace_marking(
                &mut stale,
                &Marking::from_places(["review"]),
                &Marking::from_places(["published"]),
                &Context::new(),
            )
            .unwrap();

        let err = store
            .replace_marking(
                &mut by_key,
                &Marking::from_places(["draft"]),
                &Marking::from_places(["review"]),
                &Context::new(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(repo.find("a-1").unwrap().unwrap().fields["status"], "published");
    }

    #[test]
    fn test_conditional_workflow_apply_follows_can() {
        let repo = repository();
        let def = Arc::new(
            Definition::from_json(&json!({
                "places": PLACES,
                "transitions": [
                    {"name": "submit", "from": "draft", "to": "review"},
                    {"name": "publish", "from": "review", "to": "published"}
                ]
            }))
            .unwrap(),
        );
        let store = Arc::new(
            RecordMarkingStore::new(repo.clone(), "status", def.places().iter().cloned())
                .conditional(true),
        );
        let wf = Workflow::new(def, store, None, "article@status");

        let mut subject = Record::new("article").with_id("a-1");
        assert!(wf.can(&subject, "submit").unwrap());
        wf.apply(&mut subject, "submit", Context::new()).unwrap();

        let mut stale = Record::new("article")
            .with_id("a-1")
            .with_field("status", "published");
        assert!(wf.can(&stale, "publish").unwrap());
        let marking = wf.apply(&mut stale, "publish", Context::new()).unwrap();
        assert_eq!(marking, Marking::from_places(["published"]));
        assert_eq!(repo.find("a-1").unwrap().unwrap().fields["status"], "published");
    }

    #[test]
    fn test_workflow_over_record_store() {
        let repo = repository();
        let def = Arc::new(
            Definition::from_json(&json!({
                "places": PLACES,
                "transitions": [
                    {"name": "submit", "from": "draft", "to": "review"},
                    {"name": "publish", "from": "review", "to": "published"}
                ]
            }))
            .unwrap(),
        );
        let store = Arc::new(RecordMarkingStore::new(
            repo.clone(),
            "status",
            def.places().iter().cloned(),
        ));
        let wf = Workflow::new(def, store, None, "article@status");

        let mut subject = Record::new("article").with_id("a-1");
        wf.apply(&mut subject, "submit", Context::new()).unwrap();
        assert_eq!(repo.find("a-1").unwrap().unwrap().fields["status"], "review");

        let mut ghost = Record::new("article").with_id("a-2");
        let err = wf.apply(&mut ghost, "submit", Context::new()).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Persistence(StoreError::RecordNotFound(_))
        ));
    }
}
