//! Lifecycle events and hierarchical dispatch.
//!
//! Every lifecycle point is dispatched at up to three levels, generic first:
//!
//! ```text
//! <namespace>.<kind>
//! <namespace>.<workflow>.<kind>
//! <namespace>.<workflow>.<kind>.<transition or place>
//! ```
//!
//! Listeners bind to one level through [`EventScope`]. Within a level they run
//! in registration order, except that listeners registered with `first` run
//! before the others (the most recent `first` listener runs first).

use crate::blocker::{TransitionBlocker, TransitionBlockerList};
use crate::definition::Transition;
use crate::marking::Marking;
use crate::subject::Subject;
use crate::workflow::{Context, Workflow};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default event name namespace.
pub const DEFAULT_NAMESPACE: &str = "workflow";

/// Lifecycle event kinds, in the order a successful apply fires them
/// (guard runs during evaluation, before any of the others).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Transition evaluation; listeners may block the transition.
    Guard,
    /// Before the from-places are vacated.
    Leave,
    /// Before the marking changes; listeners may edit the context.
    Transition,
    /// New marking computed, not yet persisted.
    Enter,
    /// New marking persisted.
    Entered,
    /// Transition fully applied.
    Completed,
    /// Once per transition enabled by the new marking.
    Announce,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Guard,
        EventKind::Leave,
        EventKind::Transition,
        EventKind::Enter,
        EventKind::Entered,
        EventKind::Completed,
        EventKind::Announce,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Guard => "guard",
            EventKind::Leave => "leave",
            EventKind::Transition => "transition",
            EventKind::Enter => "enter",
            EventKind::Entered => "entered",
            EventKind::Completed => "completed",
            EventKind::Announce => "announce",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: '{}'", s))
    }
}

/// The specificity level a listener binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventScope {
    /// Every workflow.
    Global,
    /// One workflow, every transition/place.
    Workflow(String),
    /// One transition or place of one workflow.
    Named { workflow: String, name: String },
}

impl EventScope {
    pub fn workflow(workflow: impl Into<String>) -> Self {
        EventScope::Workflow(workflow.into())
    }

    pub fn named(workflow: impl Into<String>, name: impl Into<String>) -> Self {
        EventScope::Named {
            workflow: workflow.into(),
            name: name.into(),
        }
    }

    fn from_parts(workflow: Option<&str>, name: Option<&str>) -> Self {
        match (workflow, name) {
            (Some(w), Some(n)) => EventScope::named(w, n),
            (Some(w), None) => EventScope::workflow(w),
            _ => EventScope::Global,
        }
    }
}

/// Formats the dotted event name for one dispatch level.
#[derive(Debug, Clone, Copy)]
pub struct EventName<'a> {
    pub namespace: &'a str,
    pub workflow: Option<&'a str>,
    pub kind: EventKind,
    pub name: Option<&'a str>,
}

impl fmt::Display for EventName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.", self.namespace)?;
        if let Some(workflow) = self.workflow {
            write!(f, "{}.", workflow)?;
        }
        write!(f, "{}", self.kind)?;
        if let (Some(_), Some(name)) = (self.workflow, self.name) {
            write!(f, ".{}", name)?;
        }
        Ok(())
    }
}

/// The event handed to listeners.
pub struct WorkflowEvent<'a> {
    kind: EventKind,
    subject: &'a dyn Subject,
    marking: &'a Marking,
    transition: Option<&'a Transition>,
    workflow: &'a Workflow,
    context: &'a mut Context,
    blockers: TransitionBlockerList,
}

impl<'a> WorkflowEvent<'a> {
    pub(crate) fn new(
        kind: EventKind,
        subject: &'a dyn Subject,
        marking: &'a Marking,
        transition: Option<&'a Transition>,
        workflow: &'a Workflow,
        context: &'a mut Context,
    ) -> Self {
        Self {
            kind,
            subject,
            marking,
            transition,
            workflow,
            context,
            blockers: TransitionBlockerList::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn subject(&self) -> &'a dyn Subject {
        self.subject
    }

    /// The marking before the change for guard/leave/transition events,
    /// the new marking from enter onwards.
    pub fn marking(&self) -> &'a Marking {
        self.marking
    }

    /// The transition being evaluated or applied. For announce events, the
    /// newly enabled transition. `None` for entered events of an initial marking.
    pub fn transition(&self) -> Option<&'a Transition> {
        self.transition
    }

    pub fn workflow(&self) -> &'a Workflow {
        self.workflow
    }

    pub fn workflow_name(&self) -> &'a str {
        self.workflow.name()
    }

    pub fn context(&self) -> &Context {
        &*self.context
    }

    /// Mutable context. Changes made during guard events are discarded.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut *self.context
    }

    /// Blocks the transition with a structured reason. Only meaningful for guard events.
    pub fn add_blocker(&mut self, blocker: TransitionBlocker) {
        if self.kind != EventKind::Guard {
            tracing::warn!(
                kind = %self.kind,
                code = %blocker.code,
                "blocker added outside of a guard event is ignored"
            );
            return;
        }
        self.blockers.add(blocker);
    }

    /// Blocks (or unblocks) the transition.
    ///
    /// Unblocking clears every blocker added so far, including those added by
    /// the built-in expression guard and by other listeners.
    pub fn set_blocked(&mut self, blocked: bool, message: Option<&str>) {
        if blocked {
            self.add_blocker(TransitionBlocker::for_listener(message));
        } else {
            self.blockers.clear();
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.blockers.is_empty()
    }

    pub fn blockers(&self) -> &TransitionBlockerList {
        &self.blockers
    }

    pub(crate) fn into_blockers(self) -> TransitionBlockerList {
        self.blockers
    }
}

/// Delivers events to listeners.
///
/// Called once per level; `workflow` and `name` are both `None` for the
/// generic level and both `Some` for the most specific one.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(
        &self,
        event: &mut WorkflowEvent<'_>,
        workflow: Option<&str>,
        kind: EventKind,
        name: Option<&str>,
    );
}

/// A listener callback.
pub type Listener = Arc<dyn Fn(&mut WorkflowEvent<'_>) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListenerKey {
    kind: EventKind,
    scope: EventScope,
}

/// In-process dispatcher with listeners bound per (kind, scope).
pub struct ListenerRegistry {
    namespace: String,
    listeners: RwLock<HashMap<ListenerKey, Vec<Listener>>>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registers a listener. With `first`, it runs before the listeners
    /// already registered at the same level.
    pub fn listen<F>(&self, kind: EventKind, scope: EventScope, first: bool, listener: F)
    where
        F: Fn(&mut WorkflowEvent<'_>) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        let entry = listeners.entry(ListenerKey { kind, scope }).or_default();
        if first {
            entry.insert(0, Arc::new(listener));
        } else {
            entry.push(Arc::new(listener));
        }
    }

    /// Listens to `kind` on every workflow.
    pub fn listen_global<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&mut WorkflowEvent<'_>) + Send + Sync + 'static,
    {
        self.listen(kind, EventScope::Global, false, listener);
    }

    /// Listens to `kind` on one workflow.
    pub fn listen_workflow<F>(&self, kind: EventKind, workflow: &str, listener: F)
    where
        F: Fn(&mut WorkflowEvent<'_>) + Send + Sync + 'static,
    {
        self.listen(kind, EventScope::workflow(workflow), false, listener);
    }

    /// Listens to `kind` for one transition name (guard, transition, completed,
    /// announce) or place name (leave, enter, entered) of one workflow.
    pub fn listen_name<F>(&self, kind: EventKind, workflow: &str, name: &str, listener: F)
    where
        F: Fn(&mut WorkflowEvent<'_>) + Send + Sync + 'static,
    {
        self.listen(kind, EventScope::named(workflow, name), false, listener);
    }

    /// Number of listeners bound to exactly this level.
    pub fn listener_count(&self, kind: EventKind, scope: &EventScope) -> usize {
        self.listeners
            .read()
            .get(&ListenerKey {
                kind,
                scope: scope.clone(),
            })
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Removes every listener bound to this level.
    pub fn clear(&self, kind: EventKind, scope: &EventScope) {
        self.listeners.write().remove(&ListenerKey {
            kind,
            scope: scope.clone(),
        });
    }
}

impl EventDispatcher for ListenerRegistry {
    fn dispatch(
        &self,
        event: &mut WorkflowEvent<'_>,
        workflow: Option<&str>,
        kind: EventKind,
        name: Option<&str>,
    ) {
        let key = ListenerKey {
            kind,
            scope: EventScope::from_parts(workflow, name),
        };
        // Clone out of the lock so listeners may register listeners or re-enter the workflow.
        let listeners = match self.listeners.read().get(&key) {
            Some(listeners) => listeners.clone(),
            None => Vec::new(),
        };

        let event_name = EventName {
            namespace: &self.namespace,
            workflow,
            kind,
            name,
        };
        tracing::trace!(
            event = %event_name,
            listeners = listeners.len(),
            "dispatching workflow event"
        );

        for listener in listeners {
            listener(event);
        }
    }
}
