//! Workflow: transition evaluation and the apply lifecycle.

use crate::blocker::{TransitionBlocker, TransitionBlockerList};
use crate::definition::{Definition, Transition};
use crate::error::WorkflowError;
use crate::event::{EventDispatcher, EventKind, WorkflowEvent};
use crate::marking::Marking;
use crate::store::MarkingStore;
use crate::subject::Subject;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Caller data carried through an apply and handed to the marking store.
pub type Context = Map<String, Value>;

/// What to do when several same-named transitions are enabled at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidatePolicy {
    /// The first enabled transition in declaration order is applied.
    #[default]
    FirstEnabled,
    /// More than one enabled candidate is an error.
    RejectAmbiguous,
}

/// A named binding of a definition, a marking store, and an event dispatcher.
///
/// Workflows hold no per-subject state and can be shared across threads.
/// Each call reads the marking afresh from the store.
pub struct Workflow {
    name: String,
    definition: Arc<Definition>,
    marking_store: Arc<dyn MarkingStore>,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
    events_to_dispatch: Option<HashSet<EventKind>>,
    candidate_policy: CandidatePolicy,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("checksum", &self.definition.checksum())
            .field("has_dispatcher", &self.dispatcher.is_some())
            .field("candidate_policy", &self.candidate_policy)
            .finish()
    }
}

impl Workflow {
    pub fn new(
        definition: Arc<Definition>,
        marking_store: Arc<dyn MarkingStore>,
        dispatcher: Option<Arc<dyn EventDispatcher>>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            definition,
            marking_store,
            dispatcher,
            events_to_dispatch: None,
            candidate_policy: CandidatePolicy::default(),
        }
    }

    /// Restricts the lifecycle events dispatched. Guard events are always dispatched.
    pub fn with_events_to_dispatch(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.events_to_dispatch = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_candidate_policy(mut self, policy: CandidatePolicy) -> Self {
        self.candidate_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn marking_store(&self) -> &dyn MarkingStore {
        self.marking_store.as_ref()
    }

    pub fn candidate_policy(&self) -> CandidatePolicy {
        self.candidate_policy
    }

    /// Reads the subject's current marking.
    ///
    /// A marking naming an undeclared place is treated as empty, so nothing is enabled.
    pub fn get_marking(&self, subject: &dyn Subject) -> Result<Marking, WorkflowError> {
        let marking = self.marking_store.get_marking(subject)?;
        if let Some(place) = marking.iter().find(|p| !self.definition.has_place(p)) {
            tracing::warn!(
                workflow = %self.name,
                place = %place,
                "marking store returned an undeclared place, treating marking as empty"
            );
            return Ok(Marking::new());
        }
        Ok(marking)
    }

    /// Puts the subject in the definition's initial places and persists them.
    pub fn initialize(
        &self,
        subject: &mut dyn Subject,
        mut context: Context,
    ) -> Result<Marking, WorkflowError> {
        let marking = Marking::from_places(self.definition.initial_places().iter().cloned());
        let previous = self.get_marking(&*subject)?;
        self.marking_store
            .replace_marking(subject, &previous, &marking, &context)?;

        tracing::debug!(workflow = %self.name, marking = %marking, "initial marking set");

        self.notify(
            EventKind::Entered,
            &*subject,
            &marking,
            None,
            &mut context,
            marking.iter(),
        );
        Ok(marking)
    }

    /// Returns true if a transition named `transition_name` can be applied now.
    pub fn can(&self, subject: &dyn Subject, transition_name: &str) -> Result<bool, WorkflowError> {
        self.can_with_context(subject, transition_name, &Context::new())
    }

    /// Like [`Workflow::can`], with guard listeners seeing `context`.
    pub fn can_with_context(
        &self,
        subject: &dyn Subject,
        transition_name: &str,
        context: &Context,
    ) -> Result<bool, WorkflowError> {
        self.ensure_transition(transition_name)?;
        let marking = self.get_marking(subject)?;
        match self.select(subject, &marking, transition_name, context) {
            Ok(_) => Ok(true),
            Err(WorkflowError::NotEnabled { .. } | WorkflowError::AmbiguousTransition { .. }) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Explains why `transition_name` cannot be applied.
    ///
    /// Empty when some candidate is enabled, otherwise the blockers of the last candidate.
    pub fn build_transition_blocker_list(
        &self,
        subject: &dyn Subject,
        transition_name: &str,
    ) -> Result<TransitionBlockerList, WorkflowError> {
        self.ensure_transition(transition_name)?;
        let marking = self.get_marking(subject)?;
        let context = Context::new();

        let mut last = TransitionBlockerList::new();
        for transition in self.definition.transitions_named(transition_name) {
            last = self.evaluate(subject, &marking, transition, &context);
            if last.is_empty() {
                break;
            }
        }
        Ok(last)
    }

    /// Every enabled transition, in declaration order.
    pub fn enabled_transitions(
        &self,
        subject: &dyn Subject,
    ) -> Result<Vec<&Transition>, WorkflowError> {
        let marking = self.get_marking(subject)?;
        Ok(self.enabled_in(subject, &marking, &Context::new()))
    }

    /// The first enabled transition with the given name, if any.
    pub fn enabled_transition(
        &self,
        subject: &dyn Subject,
        transition_name: &str,
    ) -> Result<Option<&Transition>, WorkflowError> {
        let marking = self.get_marking(subject)?;
        let context = Context::new();
        Ok(self
            .definition
            .transitions_named(transition_name)
            .find(|t| self.evaluate(subject, &marking, t, &context).is_empty()))
    }

    /// Applies a transition and persists the new marking.
    ///
    /// Lifecycle: guard, leave, transition, enter, persist, entered, completed,
    /// announce. If persisting fails, nothing after it is dispatched and the
    /// subject's storage is the only truth about what happened.
    ///
    /// Concurrent applies on the same subject are not serialized here; see
    /// [`MarkingStore`] for the obligations that falls to.
    pub fn apply(
        &self,
        subject: &mut dyn Subject,
        transition_name: &str,
        mut context: Context,
    ) -> Result<Marking, WorkflowError> {
        self.ensure_transition(transition_name)?;
        let marking = self.get_marking(&*subject)?;
        let transition = self.select(&*subject, &marking, transition_name, &context)?;

        self.notify(
            EventKind::Leave,
            &*subject,
            &marking,
            Some(transition),
            &mut context,
            transition.froms().iter().map(String::as_str),
        );
        self.notify(
            EventKind::Transition,
            &*subject,
            &marking,
            Some(transition),
            &mut context,
            [transition.name()],
        );

        let mut new_marking = marking.clone();
        for place in transition.froms() {
            new_marking.unmark(place);
        }
        for place in transition.tos() {
            new_marking.mark(place.clone());
        }

        self.notify(
            EventKind::Enter,
            &*subject,
            &new_marking,
            Some(transition),
            &mut context,
            transition.tos().iter().map(String::as_str),
        );

        self.marking_store
            .replace_marking(subject, &marking, &new_marking, &context)?;

        tracing::info!(
            workflow = %self.name,
            transition = %transition.name(),
            from = %marking,
            to = %new_marking,
            "transition applied"
        );

        self.notify(
            EventKind::Entered,
            &*subject,
            &new_marking,
            Some(transition),
            &mut context,
            transition.tos().iter().map(String::as_str),
        );
        self.notify(
            EventKind::Completed,
            &*subject,
            &new_marking,
            Some(transition),
            &mut context,
            [transition.name()],
        );

        if self.should_dispatch(EventKind::Announce) {
            for next in self.enabled_in(&*subject, &new_marking, &Context::new()) {
                self.notify(
                    EventKind::Announce,
                    &*subject,
                    &new_marking,
                    Some(next),
                    &mut context,
                    [next.name()],
                );
            }
        }

        Ok(new_marking)
    }

    fn ensure_transition(&self, transition_name: &str) -> Result<(), WorkflowError> {
        if self.definition.has_transition(transition_name) {
            Ok(())
        } else {
            Err(WorkflowError::UnknownTransition {
                workflow: self.name.clone(),
                transition: transition_name.to_string(),
            })
        }
    }

    /// Picks the candidate to apply according to the candidate policy.
    fn select(
        &self,
        subject: &dyn Subject,
        marking: &Marking,
        transition_name: &str,
        context: &Context,
    ) -> Result<&Transition, WorkflowError> {
        let mut enabled: Vec<&Transition> = Vec::new();
        let mut last_blockers = TransitionBlockerList::new();

        for transition in self.definition.transitions_named(transition_name) {
            let blockers = self.evaluate(subject, marking, transition, context);
            if blockers.is_empty() {
                enabled.push(transition);
                if self.candidate_policy == CandidatePolicy::FirstEnabled {
                    break;
                }
            } else {
                last_blockers = blockers;
            }
        }

        match enabled.as_slice() {
            [] => Err(WorkflowError::NotEnabled {
                workflow: self.name.clone(),
                transition: transition_name.to_string(),
                blockers: last_blockers,
            }),
            [only] => Ok(*only),
            many => Err(WorkflowError::AmbiguousTransition {
                workflow: self.name.clone(),
                transition: transition_name.to_string(),
                count: many.len(),
            }),
        }
    }

    fn enabled_in<'w>(
        &'w self,
        subject: &dyn Subject,
        marking: &Marking,
        context: &Context,
    ) -> Vec<&'w Transition> {
        self.definition
            .transitions()
            .iter()
            .filter(|t| self.evaluate(subject, marking, t, context).is_empty())
            .collect()
    }

    /// Blockers for one candidate: marking check, then expression guard and guard listeners.
    fn evaluate(
        &self,
        subject: &dyn Subject,
        marking: &Marking,
        transition: &Transition,
        context: &Context,
    ) -> TransitionBlockerList {
        if !marking.has_all(transition.froms().iter().map(String::as_str)) {
            let mut blockers = TransitionBlockerList::new();
            blockers.add(TransitionBlocker::for_marking(marking));
            return blockers;
        }

        let mut scratch = context.clone();
        let mut event = WorkflowEvent::new(
            EventKind::Guard,
            subject,
            marking,
            Some(transition),
            self,
            &mut scratch,
        );

        if let Some(guard) = transition.guard() {
            if !guard.allows(subject) {
                event.add_blocker(TransitionBlocker::for_expression(guard.source()));
            }
        }

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(&mut event, None, EventKind::Guard, None);
            dispatcher.dispatch(&mut event, Some(self.name.as_str()), EventKind::Guard, None);
            dispatcher.dispatch(
                &mut event,
                Some(self.name.as_str()),
                EventKind::Guard,
                Some(transition.name()),
            );
        }

        let blockers = event.into_blockers();
        if !blockers.is_empty() {
            tracing::debug!(
                workflow = %self.name,
                transition = %transition.name(),
                blockers = blockers.len(),
                "transition blocked by guard"
            );
        }
        blockers
    }

    fn should_dispatch(&self, kind: EventKind) -> bool {
        self.dispatcher.is_some()
            && self
                .events_to_dispatch
                .as_ref()
                .map(|kinds| kinds.contains(&kind))
                .unwrap_or(true)
    }

    /// Dispatches the generic, workflow, and per-name levels of one lifecycle event.
    fn notify<'n>(
        &self,
        kind: EventKind,
        subject: &dyn Subject,
        marking: &Marking,
        transition: Option<&Transition>,
        context: &mut Context,
        names: impl IntoIterator<Item = &'n str>,
    ) {
        let Some(dispatcher) = self.dispatcher.as_deref() else {
            return;
        };
        if !self.should_dispatch(kind) {
            return;
        }

        let mut event = WorkflowEvent::new(kind, subject, marking, transition, self, context);
        dispatcher.dispatch(&mut event, None, kind, None);
        dispatcher.dispatch(&mut event, Some(self.name.as_str()), kind, None);
        for name in names {
            dispatcher.dispatch(&mut event, Some(self.name.as_str()), kind, Some(name));
        }
    }
}
