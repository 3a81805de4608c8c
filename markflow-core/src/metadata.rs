//! Metadata attached to a definition, its places, and its transitions.

use crate::definition::Transition;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Arbitrary key/value metadata.
pub type Metadata = Map<String, Value>;

/// Reserved transition key: message shown when the transition is rejected.
pub const ERROR_KEY: &str = "error";
/// Reserved key: human readable label.
pub const LABEL_KEY: &str = "label";

/// What a metadata lookup is keyed on.
#[derive(Debug, Clone, Copy)]
pub enum MetadataTarget<'a> {
    Definition,
    Place(&'a str),
    Transition(&'a Transition),
}

/// Metadata keyed by identity. There is no fallback between levels: a key set
/// on the definition is not visible through a place or transition lookup.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    definition: Metadata,
    places: HashMap<String, Metadata>,
    // Indexed by transition position in the definition.
    transitions: Vec<Metadata>,
}

impl MetadataStore {
    pub(crate) fn new(
        definition: Metadata,
        places: HashMap<String, Metadata>,
        transitions: Vec<Metadata>,
    ) -> Self {
        Self {
            definition,
            places,
            transitions,
        }
    }

    pub fn definition_metadata(&self) -> &Metadata {
        &self.definition
    }

    pub fn place_metadata(&self, place: &str) -> Option<&Metadata> {
        self.places.get(place)
    }

    pub fn transition_metadata(&self, transition: &Transition) -> Option<&Metadata> {
        self.transitions.get(transition.index())
    }

    /// Looks up a single key on the given target.
    pub fn get(&self, key: &str, target: MetadataTarget<'_>) -> Option<&Value> {
        match target {
            MetadataTarget::Definition => self.definition.get(key),
            MetadataTarget::Place(place) => self.place_metadata(place)?.get(key),
            MetadataTarget::Transition(t) => self.transition_metadata(t)?.get(key),
        }
    }

    /// The `error` message declared on a transition.
    pub fn transition_error(&self, transition: &Transition) -> Option<&str> {
        self.get(ERROR_KEY, MetadataTarget::Transition(transition))?
            .as_str()
    }

    /// The `label` declared on a transition.
    pub fn transition_label(&self, transition: &Transition) -> Option<&str> {
        self.get(LABEL_KEY, MetadataTarget::Transition(transition))?
            .as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Definition;
    use serde_json::json;

    #[test]
    fn test_lookup_by_identity_without_fallback() {
        let def = Definition::from_json(&json!({
            "places": {
                "draft": {"color": "grey"},
                "review": null
            },
            "transitions": [
                {"name": "submit", "from": "draft", "to": "review",
                 "metadata": {"label": "Submit for review", "error": "not a draft"}},
                {"name": "submit", "from": "review", "to": "review"}
            ],
            "metadata": {"title": "Articles", "color": "blue"}
        }))
        .unwrap();
        let store = def.metadata();
        let first = &def.transitions()[0];
        let second = &def.transitions()[1];

        assert_eq!(
            store.get("title", MetadataTarget::Definition),
            Some(&json!("Articles"))
        );
        assert_eq!(
            store.get("color", MetadataTarget::Place("draft")),
            Some(&json!("grey"))
        );
        assert_eq!(store.get("color", MetadataTarget::Place("review")), None);
        assert_eq!(store.get("title", MetadataTarget::Transition(first)), None);

        assert_eq!(store.transition_label(first), Some("Submit for review"));
        assert_eq!(store.transition_error(first), Some("not a draft"));
        // Same name, different identity.
        assert_eq!(store.transition_error(second), None);
    }
}
