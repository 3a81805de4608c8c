//! Workflow definition types.
//!
//! Definitions are usually loaded from JSON or YAML:
//!
//! ```json
//! {
//!   "type": "state_machine",
//!   "places": ["draft", "review", "published"],
//!   "initial": "draft",
//!   "transitions": [
//!     {"name": "submit", "from": "draft", "to": "review"},
//!     {"name": "publish", "from": "review", "to": "published",
//!      "guard": "subject.approved", "metadata": {"error": "Needs approval"}}
//!   ]
//! }
//! ```
//!
//! `places` may also be a mapping of place name to metadata, `from`/`to`/`initial`
//! accept a single name or a list, and `initial` defaults to the first place.

use crate::error::WorkflowError;
use crate::guard::Guard;
use crate::metadata::{Metadata, MetadataStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Whether subjects may occupy several places at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Any number of places may be occupied (fork/join allowed).
    #[default]
    Workflow,
    /// Exactly one place is occupied; every transition has one from and one to place.
    StateMachine,
}

/// A place as written in a raw definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRaw {
    pub name: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl PlaceRaw {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: Metadata::new(),
        }
    }
}

/// A transition as written in a raw definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRaw {
    pub name: String,

    /// Source place(s). Can be a single place or multiple.
    #[serde(deserialize_with = "deserialize_names")]
    pub from: Vec<String>,

    /// Target place(s).
    #[serde(deserialize_with = "deserialize_names")]
    pub to: Vec<String>,

    /// Optional guard expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl TransitionRaw {
    pub fn new<F, T>(name: impl Into<String>, from: F, to: T) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            name: name.into(),
            from: from.into_iter().map(Into::into).collect(),
            to: to.into_iter().map(Into::into).collect(),
            guard: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Raw definition as loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRaw {
    #[serde(rename = "type", default)]
    pub kind: WorkflowType,

    /// Ordered places.
    #[serde(deserialize_with = "deserialize_places")]
    pub places: Vec<PlaceRaw>,

    #[serde(default)]
    pub transitions: Vec<TransitionRaw>,

    /// Initial place(s). Absent means the first declared place.
    #[serde(
        default,
        deserialize_with = "deserialize_initial",
        skip_serializing_if = "Option::is_none"
    )]
    pub initial: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// Accepts a single name or a list of names. Integers are read as names.
fn deserialize_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct NamesVisitor;

    impl<'de> Visitor<'de> for NamesVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a place name or a list of place names")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut names = Vec::new();
            while let Some(name) = seq.next_element::<PlaceName>()? {
                names.push(name.0);
            }
            Ok(names)
        }
    }

    deserializer.deserialize_any(NamesVisitor)
}

fn deserialize_initial<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_names(deserializer).map(Some)
}

/// A place name that may be written as a string or an integer.
struct PlaceName(String);

impl<'de> Deserialize<'de> for PlaceName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Int(i64),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Str(s) => PlaceName(s),
            Repr::Int(i) => PlaceName(i.to_string()),
        })
    }
}

/// Accepts a list of names or place objects, or a mapping of name to metadata.
fn deserialize_places<'de, D>(deserializer: D) -> Result<Vec<PlaceRaw>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PlaceEntry {
        Full(PlaceRaw),
        Name(String),
        Int(i64),
    }

    struct PlacesVisitor;

    impl<'de> Visitor<'de> for PlacesVisitor {
        type Value = Vec<PlaceRaw>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a list of places or a mapping of place name to metadata")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut places = Vec::new();
            while let Some(entry) = seq.next_element::<PlaceEntry>()? {
                places.push(match entry {
                    PlaceEntry::Full(place) => place,
                    PlaceEntry::Name(name) => PlaceRaw::new(name),
                    PlaceEntry::Int(i) => PlaceRaw::new(i.to_string()),
                });
            }
            Ok(places)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            // Entries arrive in document order.
            let mut places = Vec::new();
            while let Some((name, metadata)) = map.next_entry::<String, Option<Metadata>>()? {
                places.push(PlaceRaw {
                    name,
                    metadata: metadata.unwrap_or_default(),
                });
            }
            Ok(places)
        }
    }

    deserializer.deserialize_any(PlacesVisitor)
}

/// A validated transition.
#[derive(Debug, Clone)]
pub struct Transition {
    index: usize,
    name: String,
    froms: Vec<String>,
    tos: Vec<String>,
    guard: Option<Guard>,
}

impl Transition {
    /// Position in the definition; the transition's identity.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn froms(&self) -> &[String] {
        &self.froms
    }

    pub fn tos(&self) -> &[String] {
        &self.tos
    }

    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }
}

impl PartialEq for Transition {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.name == other.name
            && self.froms == other.froms
            && self.tos == other.tos
    }
}

/// Validated, immutable workflow definition.
#[derive(Debug, Clone)]
pub struct Definition {
    kind: WorkflowType,
    places: Vec<String>,
    place_set: HashSet<String>,
    transitions: Vec<Transition>,
    initial: Vec<String>,
    metadata: MetadataStore,
    raw: DefinitionRaw,
    checksum: String,
}

impl Definition {
    /// Parses and validates a definition from JSON.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, WorkflowError> {
        let raw: DefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Parses and validates a definition from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, WorkflowError> {
        let raw: DefinitionRaw = serde_yaml::from_str(yaml)?;
        Self::from_raw(raw)
    }

    /// Validates a raw definition.
    pub fn from_raw(raw: DefinitionRaw) -> Result<Self, WorkflowError> {
        if raw.places.is_empty() {
            return Err(WorkflowError::configuration("no places declared"));
        }

        let mut places = Vec::with_capacity(raw.places.len());
        let mut place_set = HashSet::new();
        let mut place_metadata = HashMap::new();
        for place in &raw.places {
            if place.name.is_empty() {
                return Err(WorkflowError::configuration("place name cannot be empty"));
            }
            if !place_set.insert(place.name.clone()) {
                return Err(WorkflowError::configuration(format!(
                    "place '{}' declared twice",
                    place.name
                )));
            }
            places.push(place.name.clone());
            if !place.metadata.is_empty() {
                place_metadata.insert(place.name.clone(), place.metadata.clone());
            }
        }

        let mut transitions = Vec::with_capacity(raw.transitions.len());
        let mut transition_metadata = Vec::with_capacity(raw.transitions.len());
        for (index, t) in raw.transitions.iter().enumerate() {
            if t.name.is_empty() {
                return Err(WorkflowError::configuration(format!(
                    "transition #{} has no name",
                    index
                )));
            }

            let froms = dedup(&t.from);
            let tos = dedup(&t.to);
            if froms.is_empty() || tos.is_empty() {
                return Err(WorkflowError::configuration(format!(
                    "transition '{}' needs at least one from and one to place",
                    t.name
                )));
            }
            for place in froms.iter().chain(tos.iter()) {
                if !place_set.contains(place) {
                    return Err(WorkflowError::configuration(format!(
                        "transition '{}' references undeclared place '{}'",
                        t.name, place
                    )));
                }
            }

            let guard = t.guard.as_deref().map(Guard::parse).transpose()?;

            transitions.push(Transition {
                index,
                name: t.name.clone(),
                froms,
                tos,
                guard,
            });
            transition_metadata.push(t.metadata.clone());
        }

        let initial = match &raw.initial {
            Some(names) if !names.is_empty() => dedup(names),
            _ => vec![places[0].clone()],
        };
        for place in &initial {
            if !place_set.contains(place) {
                return Err(WorkflowError::configuration(format!(
                    "initial place '{}' is not declared",
                    place
                )));
            }
        }

        if raw.kind == WorkflowType::StateMachine {
            validate_state_machine(&transitions, &initial)?;
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            kind: raw.kind,
            places,
            place_set,
            transitions,
            initial,
            metadata: MetadataStore::new(raw.metadata.clone(), place_metadata, transition_metadata),
            raw,
            checksum,
        })
    }

    pub fn kind(&self) -> WorkflowType {
        self.kind
    }

    /// Places in declaration order.
    pub fn places(&self) -> &[String] {
        &self.places
    }

    pub fn has_place(&self, place: &str) -> bool {
        self.place_set.contains(place)
    }

    /// Transitions in declaration order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// All transitions sharing a name, in declaration order.
    pub fn transitions_named<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a Transition> + 'n
    where
        'a: 'n,
    {
        self.transitions.iter().filter(move |t| t.name == name)
    }

    pub fn has_transition(&self, name: &str) -> bool {
        self.transitions.iter().any(|t| t.name == name)
    }

    /// Distinct transition names in declaration order.
    pub fn transition_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.transitions
            .iter()
            .map(|t| t.name.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    pub fn initial_places(&self) -> &[String] {
        &self.initial
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// CRC32C of the canonical JSON form.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn raw(&self) -> &DefinitionRaw {
        &self.raw
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, WorkflowError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}

fn dedup(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect()
}

fn validate_state_machine(
    transitions: &[Transition],
    initial: &[String],
) -> Result<(), WorkflowError> {
    if initial.len() != 1 {
        return Err(WorkflowError::configuration(
            "a state machine must have exactly one initial place",
        ));
    }

    let mut seen = HashSet::new();
    for t in transitions {
        if t.froms.len() != 1 || t.tos.len() != 1 {
            return Err(WorkflowError::configuration(format!(
                "state machine transition '{}' must have exactly one from and one to place",
                t.name
            )));
        }
        if !seen.insert((t.froms[0].as_str(), t.name.as_str())) {
            return Err(WorkflowError::configuration(format!(
                "state machine has two transitions named '{}' from place '{}'",
                t.name, t.froms[0]
            )));
        }
    }

    Ok(())
}

/// Assembles a definition in code.
#[derive(Debug, Clone, Default)]
pub struct DefinitionBuilder {
    raw: DefinitionRaw,
}

impl DefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: WorkflowType) -> Self {
        self.raw.kind = kind;
        self
    }

    pub fn place(mut self, name: impl Into<String>) -> Self {
        self.raw.places.push(PlaceRaw::new(name));
        self
    }

    pub fn places<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw
            .places
            .extend(names.into_iter().map(|n| PlaceRaw::new(n)));
        self
    }

    pub fn place_with_metadata(mut self, name: impl Into<String>, metadata: Metadata) -> Self {
        self.raw.places.push(PlaceRaw {
            name: name.into(),
            metadata,
        });
        self
    }

    pub fn transition(mut self, transition: TransitionRaw) -> Self {
        self.raw.transitions.push(transition);
        self
    }

    pub fn initial<I, S>(mut self, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw.initial = Some(places.into_iter().map(Into::into).collect());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.raw.metadata = metadata;
        self
    }

    pub fn build(self) -> Result<Definition, WorkflowError> {
        Definition::from_raw(self.raw)
    }
}
