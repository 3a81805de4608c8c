//! The subject contract: what an entity must expose to be driven by a workflow.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An entity whose status is governed by one or more workflows.
///
/// The engine never inspects subjects itself; marking stores read and write
/// the status field, guard expressions read fields, and support strategies
/// match on [`Subject::subject_type`].
pub trait Subject: Send + Sync {
    /// Type name used for workflow lookup, e.g. `"article"`.
    fn subject_type(&self) -> &str;

    /// Primary key of the persisted entity, if it has one.
    fn subject_id(&self) -> Option<String> {
        None
    }

    /// Reads a top-level field.
    fn field(&self, name: &str) -> Option<Value>;

    /// Writes a top-level field.
    fn set_field(&mut self, name: &str, value: Value);
}

/// A loosely typed subject: a type name, an optional id, and a field map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            fields: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl Subject for Record {
    fn subject_type(&self) -> &str {
        &self.kind
    }

    fn subject_id(&self) -> Option<String> {
        self.id.clone()
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }
}
