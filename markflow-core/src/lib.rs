//! # markflow-core
//!
//! Workflow engine for place/transition models.
//!
//! This crate provides:
//! - Definition parsing and validation (places, transitions, guards, metadata)
//! - Transition evaluation with structured blockers
//! - The apply lifecycle with hierarchical event dispatch
//! - The marking store contract and a field-backed store
//! - Workflow lookup by subject

pub mod blocker;
pub mod definition;
pub mod error;
pub mod event;
pub mod facade;
pub mod guard;
pub mod marking;
pub mod metadata;
pub mod registry;
pub mod store;
pub mod subject;
pub mod workflow;

pub use blocker::{TransitionBlocker, TransitionBlockerList};
pub use definition::{Definition, DefinitionBuilder, DefinitionRaw, Transition, TransitionRaw, WorkflowType};
pub use error::{ErrorTransition, StoreError, WorkflowError};
pub use event::{EventDispatcher, EventKind, EventScope, ListenerRegistry, WorkflowEvent};
pub use facade::{ApplyError, SubjectWorkflow};
pub use guard::Guard;
pub use marking::Marking;
pub use metadata::{Metadata, MetadataTarget};
pub use registry::{InstanceOfSupportStrategy, Registry, SupportStrategy};
pub use store::{FieldMarkingStore, MarkingStore};
pub use subject::{Record, Subject};
pub use workflow::{CandidatePolicy, Context, Workflow};
