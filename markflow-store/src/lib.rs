//! # markflow-store
//!
//! Record persistence for markflow.
//!
//! This crate provides:
//! - Record repositories (in-memory and JSON file)
//! - A marking store that locates subjects by primary key

pub mod error;
pub mod record_store;
pub mod repository;

pub use error::RepositoryError;
pub use record_store::RecordMarkingStore;
pub use repository::{
    InMemoryRepository, JsonFileRepository, Precondition, RecordRepository, StoredRecord,
};
