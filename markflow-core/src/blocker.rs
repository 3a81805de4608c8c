//! Structured reasons a transition cannot fire.

use crate::marking::Marking;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The subject does not occupy every from-place of the transition.
pub const BLOCKED_BY_MARKING: &str = "blocked_by_marking";
/// The transition's guard expression evaluated to false.
pub const BLOCKED_BY_EXPRESSION_GUARD: &str = "blocked_by_expression_guard";
/// A guard listener blocked the transition.
pub const BLOCKED_BY_LISTENER: &str = "blocked_by_listener";
/// Unspecified reason.
pub const UNKNOWN: &str = "unknown";

/// Why a transition is blocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionBlocker {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl TransitionBlocker {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            parameters,
        }
    }

    /// The marking does not enable the transition.
    pub fn for_marking(marking: &Marking) -> Self {
        let mut parameters = Map::new();
        parameters.insert(
            "marking".to_string(),
            Value::Array(marking.iter().map(|p| Value::String(p.to_string())).collect()),
        );
        Self::new(
            BLOCKED_BY_MARKING,
            "The marking does not enable the transition.",
            parameters,
        )
    }

    /// The guard expression of the transition is not satisfied.
    pub fn for_expression(expression: &str) -> Self {
        let mut parameters = Map::new();
        parameters.insert(
            "expression".to_string(),
            Value::String(expression.to_string()),
        );
        Self::new(
            BLOCKED_BY_EXPRESSION_GUARD,
            format!("The guard expression \"{}\" is not satisfied.", expression),
            parameters,
        )
    }

    /// A listener blocked the transition without giving a structured reason.
    pub fn for_listener(message: Option<&str>) -> Self {
        Self::new(
            BLOCKED_BY_LISTENER,
            message.unwrap_or("The transition has been blocked by a guard listener."),
            Map::new(),
        )
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(UNKNOWN, message, Map::new())
    }
}

/// Ordered blockers for one transition evaluation. Empty means enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionBlockerList {
    blockers: Vec<TransitionBlocker>,
}

impl TransitionBlockerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, blocker: TransitionBlocker) {
        self.blockers.push(blocker);
    }

    pub fn has(&self, code: &str) -> bool {
        self.blockers.iter().any(|b| b.code == code)
    }

    pub fn clear(&mut self) {
        self.blockers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.blockers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blockers.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransitionBlocker> {
        self.blockers.iter()
    }
}

impl IntoIterator for TransitionBlockerList {
    type Item = TransitionBlocker;
    type IntoIter = std::vec::IntoIter<TransitionBlocker>;

    fn into_iter(self) -> Self::IntoIter {
        self.blockers.into_iter()
    }
}

impl<'a> IntoIterator for &'a TransitionBlockerList {
    type Item = &'a TransitionBlocker;
    type IntoIter = std::slice::Iter<'a, TransitionBlocker>;

    fn into_iter(self) -> Self::IntoIter {
        self.blockers.iter()
    }
}

impl FromIterator<TransitionBlocker> for TransitionBlockerList {
    fn from_iter<I: IntoIterator<Item = TransitionBlocker>>(iter: I) -> Self {
        Self {
            blockers: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocker_list_order_and_codes() {
        let mut list = TransitionBlockerList::new();
        assert!(list.is_empty());

        list.add(TransitionBlocker::for_marking(&Marking::from_places(["draft"])));
        list.add(TransitionBlocker::for_listener(Some("insufficient_role")));

        assert_eq!(list.len(), 2);
        assert!(list.has(BLOCKED_BY_MARKING));
        assert!(list.has(BLOCKED_BY_LISTENER));
        assert!(!list.has(BLOCKED_BY_EXPRESSION_GUARD));

        let codes: Vec<_> = list.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(codes, vec![BLOCKED_BY_MARKING, BLOCKED_BY_LISTENER]);
        assert_eq!(list.iter().nth(1).unwrap().message, "insufficient_role");

        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn test_marking_blocker_parameters() {
        let blocker = TransitionBlocker::for_marking(&Marking::from_places(["a", "b"]));
        assert_eq!(blocker.parameters["marking"], serde_json::json!(["a", "b"]));
    }
}
