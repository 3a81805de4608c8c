//! Marking persistence contract.

use crate::error::StoreError;
use crate::marking::Marking;
use crate::subject::Subject;
use crate::workflow::Context;
use serde_json::Value;
use std::collections::HashSet;

/// Reads and writes a subject's marking.
///
/// `get_marking` must return an empty marking, never an error, when the stored
/// value names no declared place; errors are reserved for storage failures.
///
/// `set_marking` must be atomic with respect to the subject's storage: when it
/// fails, the subject must still show the old marking.
///
/// The engine does not serialize concurrent applies on one subject. A store
/// used from several threads must provide row-level locking, a conditional
/// update keyed on the previously observed value, or rely on a single writer.
pub trait MarkingStore: Send + Sync {
    fn get_marking(&self, subject: &dyn Subject) -> Result<Marking, StoreError>;

    fn set_marking(
        &self,
        subject: &mut dyn Subject,
        marking: &Marking,
        context: &Context,
    ) -> Result<(), StoreError>;

    /// Stores `marking` over `previous`, the marking the engine read before
    /// computing it. Stores with conditional writes fail with
    /// [`StoreError::Conflict`] when the stored marking is no longer
    /// `previous`; the default ignores it.
    fn replace_marking(
        &self,
        subject: &mut dyn Subject,
        previous: &Marking,
        marking: &Marking,
        context: &Context,
    ) -> Result<(), StoreError> {
        let _ = previous;
        self.set_marking(subject, marking, context)
    }
}

/// Keeps the marking in one field of the subject itself.
///
/// Single-state mode stores a place name string; multi-state mode stores an
/// array of place names. The context is not persisted.
#[derive(Debug, Clone)]
pub struct FieldMarkingStore {
    field: String,
    places: HashSet<String>,
    multi_state: bool,
}

/// Field used when none is configured.
pub const DEFAULT_FIELD: &str = "status";

impl FieldMarkingStore {
    /// Single-state store over `field`, recognising only `places`.
    pub fn new<I, S>(field: impl Into<String>, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let field = field.into();
        Self {
            field: if field.is_empty() {
                DEFAULT_FIELD.to_string()
            } else {
                field
            },
            places: places.into_iter().map(Into::into).collect(),
            multi_state: false,
        }
    }

    pub fn multi_state(mut self, multi_state: bool) -> Self {
        self.multi_state = multi_state;
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_multi_state(&self) -> bool {
        self.multi_state
    }

    /// Converts a stored field value into a marking.
    pub fn marking_from_value(&self, value: Option<&Value>) -> Marking {
        let Some(value) = value else {
            return Marking::new();
        };

        let names: Vec<String> = match (value, self.multi_state) {
            (Value::Array(items), true) => items.iter().filter_map(place_name).collect(),
            (value, _) => place_name(value).into_iter().collect(),
        };

        if names.is_empty() || names.iter().any(|n| !self.places.contains(n)) {
            if !names.is_empty() {
                tracing::warn!(
                    field = %self.field,
                    value = %value,
                    "stored marking names an undeclared place"
                );
            }
            return Marking::new();
        }

        Marking::from_places(names)
    }

    /// Converts a marking into the field value to store.
    pub fn value_from_marking(&self, marking: &Marking) -> Value {
        if self.multi_state {
            Value::Array(marking.iter().map(|p| Value::String(p.to_string())).collect())
        } else {
            marking
                .iter()
                .next()
                .map(|p| Value::String(p.to_string()))
                .unwrap_or(Value::Null)
        }
    }
}

/// Reads a place name from a string or integer value.
pub(crate) fn place_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

impl MarkingStore for FieldMarkingStore {
    fn get_marking(&self, subject: &dyn Subject) -> Result<Marking, StoreError> {
        Ok(self.marking_from_value(subject.field(&self.field).as_ref()))
    }

    fn set_marking(
        &self,
        subject: &mut dyn Subject,
        marking: &Marking,
        _context: &Context,
    ) -> Result<(), StoreError> {
        if !self.multi_state && marking.len() > 1 {
            return Err(StoreError::Unsupported(format!(
                "field '{}' holds a single place, marking {} has {}",
                self.field,
                marking,
                marking.len()
            )));
        }
        subject.set_field(&self.field, self.value_from_marking(marking));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Record;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> FieldMarkingStore {
        FieldMarkingStore::new("status", ["draft", "review", "published"])
    }

    #[test]
    fn test_get_marking_single_state() {
        let record = Record::new("article").with_field("status", "review");
        let marking = store().get_marking(&record).unwrap();
        assert_eq!(marking, Marking::from_places(["review"]));
    }

    #[test]
    fn test_unknown_value_is_empty_marking() {
        let store = store();
        for value in [json!("deleted"), json!(null), json!({"x": 1}), json!(7)] {
            let record = Record::new("article").with_field("status", value);
            assert!(store.get_marking(&record).unwrap().is_empty());
        }
        let record = Record::new("article");
        assert!(store.get_marking(&record).unwrap().is_empty());
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_undeclared_place_logs_warning() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let record = Record::new("article").with_field("status", "deleted");
        tracing::subscriber::with_default(subscriber, || {
            assert!(store().get_marking(&record).unwrap().is_empty());
        });

        let output = String::from_utf8(log.0.lock().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("undeclared place"));
    }

    #[test]
    fn test_integer_places() {
        let store = FieldMarkingStore::new("state", ["0", "1"]);
        let record = Record::new("order").with_field("state", 1);
        assert_eq!(
            store.get_marking(&record).unwrap(),
            Marking::from_places(["1"])
        );
    }

    #[test]
    fn test_set_marking_single_state() {
        let store = store();
        let mut record = Record::new("article").with_field("status", "draft");
        store
            .set_marking(&mut record, &Marking::from_places(["review"]), &Context::new())
            .unwrap();
        assert_eq!(record.fields["status"], "review");

        let result = store.set_marking(
            &mut record,
            &Marking::from_places(["review", "published"]),
            &Context::new(),
        );
        assert!(matches!(result, Err(StoreError::Unsupported(_))));
        assert_eq!(record.fields["status"], "review");
    }

    #[test]
    fn test_multi_state_roundtrip() {
        let store = FieldMarkingStore::new("", ["pending", "a", "b"]).multi_state(true);
        assert_eq!(store.field(), DEFAULT_FIELD);

        let mut record = Record::new("job");
        let marking = Marking::from_places(["a", "b"]);
        store
            .set_marking(&mut record, &marking, &Context::new())
            .unwrap();
        assert_eq!(record.fields["status"], json!(["a", "b"]));
        assert_eq!(store.get_marking(&record).unwrap(), marking);

        record.set_field("status", json!(["a", "gone"]));
        assert!(store.get_marking(&record).unwrap().is_empty());
    }
}
