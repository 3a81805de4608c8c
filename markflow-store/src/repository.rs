//! Record repositories: where subjects live when they are not in memory.

use crate::error::RepositoryError;
use dashmap::DashMap;
use markflow_core::Record;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// A persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Incremented on every update.
    pub version: u64,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl StoredRecord {
    /// The record as a workflow subject.
    pub fn to_record(&self) -> Record {
        Record {
            kind: self.kind.clone(),
            id: Some(self.id.clone()),
            fields: self.fields.clone(),
        }
    }

    fn check(&self, precondition: &Precondition) -> Result<(), RepositoryError> {
        let reason = match precondition {
            Precondition::None => return Ok(()),
            Precondition::Version(expected) if *expected != self.version => {
                format!("expected version {}, found {}", expected, self.version)
            }
            Precondition::FieldEquals { field, value } if self.fields.get(field) != value.as_ref() => {
                format!(
                    "expected field '{}' to be {}, found {}",
                    field,
                    value.as_ref().unwrap_or(&Value::Null),
                    self.fields.get(field).unwrap_or(&Value::Null)
                )
            }
            _ => return Ok(()),
        };
        Err(RepositoryError::PreconditionFailed {
            id: self.id.clone(),
            reason,
        })
    }

    fn merge(&mut self, changes: &Map<String, Value>) {
        for (key, value) in changes {
            self.fields.insert(key.clone(), value.clone());
        }
        self.version += 1;
    }
}

/// Condition checked atomically with an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Precondition {
    #[default]
    None,
    /// The record's version must match.
    Version(u64),
    /// The field must hold this value (`None` means absent).
    FieldEquals { field: String, value: Option<Value> },
}

/// Record storage keyed by primary key.
///
/// `update` merges `changes` into the record's fields as a single atomic
/// step: either every change is stored or none is.
pub trait RecordRepository: Send + Sync {
    fn find(&self, id: &str) -> Result<Option<StoredRecord>, RepositoryError>;

    /// Inserts a new record; generates an id when none is given.
    fn insert(
        &self,
        kind: &str,
        id: Option<String>,
        fields: Map<String, Value>,
    ) -> Result<StoredRecord, RepositoryError>;

    fn update(
        &self,
        id: &str,
        changes: &Map<String, Value>,
        precondition: &Precondition,
    ) -> Result<StoredRecord, RepositoryError>;

    /// All records, optionally of one type, ordered by id.
    fn list(&self, kind: Option<&str>) -> Result<Vec<StoredRecord>, RepositoryError>;
}

fn generate_id() -> String {
    format!("rec-{}", uuid::Uuid::new_v4())
}

/// Repository held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: DashMap<String, StoredRecord>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordRepository for InMemoryRepository {
    fn find(&self, id: &str) -> Result<Option<StoredRecord>, RepositoryError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    fn insert(
        &self,
        kind: &str,
        id: Option<String>,
        fields: Map<String, Value>,
    ) -> Result<StoredRecord, RepositoryError> {
        let id = id.unwrap_or_else(generate_id);
        match self.records.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RepositoryError::AlreadyExists(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let record = StoredRecord {
                    id,
                    kind: kind.to_string(),
                    version: 1,
                    fields,
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    fn update(
        &self,
        id: &str,
        changes: &Map<String, Value>,
        precondition: &Precondition,
    ) -> Result<StoredRecord, RepositoryError> {
        // The entry guard holds the shard lock for the whole check-and-merge.
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        entry.check(precondition)?;
        entry.merge(changes);
        Ok(entry.clone())
    }

    fn list(&self, kind: Option<&str>) -> Result<Vec<StoredRecord>, RepositoryError> {
        let mut records: Vec<StoredRecord> = self
            .records
            .iter()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

/// Repository persisted as one JSON file.
///
/// Every write rewrites the file through a temporary file and a rename, so the
/// file always holds either the old or the new state. If the write fails the
/// in-memory state is rolled back.
pub struct JsonFileRepository {
    path: PathBuf,
    records: RwLock<BTreeMap<String, StoredRecord>>,
}

impl JsonFileRepository {
    /// Opens or creates the repository file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let records = if path.exists() {
            let file = File::open(&path)?;
            let stored: Vec<StoredRecord> = serde_json::from_reader(BufReader::new(file))?;
            let mut records = BTreeMap::new();
            for record in stored {
                if let Some(dup) = records.insert(record.id.clone(), record) {
                    return Err(RepositoryError::Corruption(format!(
                        "record '{}' appears twice in {}",
                        dup.id,
                        path.display()
                    )));
                }
            }
            records
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), records = records.len(), "record file opened");

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &BTreeMap<String, StoredRecord>) -> Result<(), RepositoryError> {
        let data = serde_json::to_vec_pretty(&records.values().collect::<Vec<_>>())?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl RecordRepository for JsonFileRepository {
    fn find(&self, id: &str) -> Result<Option<StoredRecord>, RepositoryError> {
        Ok(self.records.read().get(id).cloned())
    }

    fn insert(
        &self,
        kind: &str,
        id: Option<String>,
        fields: Map<String, Value>,
    ) -> Result<StoredRecord, RepositoryError> {
        let id = id.unwrap_or_else(generate_id);
        let mut records = self.records.write();
        if records.contains_key(&id) {
            return Err(RepositoryError::AlreadyExists(id));
        }

        let record = StoredRecord {
            id: id.clone(),
            kind: kind.to_string(),
            version: 1,
            fields,
        };
        records.insert(id.clone(), record.clone());
        if let Err(e) = self.persist(&records) {
            records.remove(&id);
            return Err(e);
        }
        Ok(record)
    }

    fn update(
        &self,
        id: &str,
        changes: &Map<String, Value>,
        precondition: &Precondition,
    ) -> Result<StoredRecord, RepositoryError> {
        let mut records = self.records.write();
        let previous = records
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        previous.check(precondition)?;

        let mut updated = previous.clone();
        updated.merge(changes);
        records.insert(id.to_string(), updated.clone());

        if let Err(e) = self.persist(&records) {
            tracing::warn!(id = %id, error = %e, "record write failed, rolling back");
            records.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(updated)
    }

    fn list(&self, kind: Option<&str>) -> Result<Vec<StoredRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn exercise(repo: &dyn RecordRepository) {
        let created = repo
            .insert("article", None, fields(json!({"status": "draft"})))
            .unwrap();
        assert!(created.id.starts_with("rec-"));
        assert_eq!(created.version, 1);

        let updated = repo
            .update(
                &created.id,
                &fields(json!({"status": "review", "reviewer": "bob"})),
                &Precondition::Version(1),
            )
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.fields["status"], "review");
        assert_eq!(updated.fields["reviewer"], "bob");

        let stale = repo.update(
            &created.id,
            &fields(json!({"status": "published"})),
            &Precondition::Version(1),
        );
        assert!(matches!(stale, Err(RepositoryError::PreconditionFailed { .. })));

        let wrong_field = repo.update(
            &created.id,
            &fields(json!({"status": "published"})),
            &Precondition::FieldEquals {
                field: "status".to_string(),
                value: Some(json!("draft")),
            },
        );
        assert!(matches!(wrong_field, Err(RepositoryError::PreconditionFailed { .. })));
        assert_eq!(repo.find(&created.id).unwrap().unwrap(), updated);

        assert!(matches!(
            repo.update("missing", &Map::new(), &Precondition::None),
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.insert("article", Some(created.id.clone()), Map::new()),
            Err(RepositoryError::AlreadyExists(_))
        ));

        repo.insert("note", Some("n-1".to_string()), Map::new()).unwrap();
        assert_eq!(repo.list(None).unwrap().len(), 2);
        assert_eq!(repo.list(Some("note")).unwrap()[0].id, "n-1");

        let record = repo.find("n-1").unwrap().unwrap().to_record();
        assert_eq!(record.id.as_deref(), Some("n-1"));
        assert_eq!(record.kind, "note");
    }

    #[test]
    fn test_in_memory_repository() {
        let repo = InMemoryRepository::new();
        exercise(&repo);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn test_json_file_repository() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("records.json")).unwrap();
        exercise(&repo);
    }

    #[test]
    fn test_json_file_repository_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("records.json");
        {
            let repo = JsonFileRepository::open(&path).unwrap();
            repo.insert("order", Some("o-1".to_string()), fields(json!({"status": "new"})))
                .unwrap();
            repo.update("o-1", &fields(json!({"status": "paid"})), &Precondition::None)
                .unwrap();
        }

        let repo = JsonFileRepository::open(&path).unwrap();
        let record = repo.find("o-1").unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.fields["status"], "paid");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_file_repository_rolls_back_on_write_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        let repo = JsonFileRepository::open(&path).unwrap();
        repo.insert("order", Some("o-1".to_string()), fields(json!({"status": "new"})))
            .unwrap();

        // A directory where the temp file should go makes the write fail.
        fs::create_dir(path.with_extension("json.tmp")).unwrap();
        let result = repo.update("o-1", &fields(json!({"status": "paid"})), &Precondition::None);
        assert!(matches!(result, Err(RepositoryError::Io(_))));

        let record = repo.find("o-1").unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.fields["status"], "new");
    }

    #[test]
    fn test_json_file_repository_rejects_duplicates_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        fs::write(
            &path,
            r#"[{"id":"a","type":"t","version":1},{"id":"a","type":"t","version":2}]"#,
        )
        .unwrap();
        assert!(matches!(
            JsonFileRepository::open(&path),
            Err(RepositoryError::Corruption(_))
        ));
    }
}
