//! Markings: the places one subject occupies at one instant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Set of currently occupied place names.
///
/// A strict state machine occupies exactly one place; a workflow may occupy
/// several at once (parallel branches of a fork).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marking {
    places: BTreeSet<String>,
}

impl Marking {
    /// Creates an empty marking.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_places<I, S>(places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            places: places.into_iter().map(Into::into).collect(),
        }
    }

    pub fn mark(&mut self, place: impl Into<String>) {
        self.places.insert(place.into());
    }

    pub fn unmark(&mut self, place: &str) {
        self.places.remove(place);
    }

    pub fn has(&self, place: &str) -> bool {
        self.places.contains(place)
    }

    /// Returns true if every given place is occupied.
    pub fn has_all<'a>(&self, places: impl IntoIterator<Item = &'a str>) -> bool {
        places.into_iter().all(|p| self.has(p))
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.places.iter().map(String::as_str)
    }

    /// The occupied place when exactly one is occupied.
    pub fn single(&self) -> Option<&str> {
        if self.places.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }
}

impl fmt::Display for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, place) in self.places.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", place)?;
        }
        write!(f, "}}")
    }
}
