//! Name model for the overlay: an ordered sequence of opaque components
//! ending in a sequence-number suffix.
//!
//! The wire encoding of a component is left to the face implementation;
//! this crate only ever reasons about the decoded `String` form.

use std::fmt;

/// The semantic role encoded at position `-2` of a [`Name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterestKind {
    /// One-shot tree broadcast / acknowledgement round.
    Initialization,
    /// Steady-state aggregation traffic for one iteration.
    Data,
}

impl InterestKind {
    fn as_component(self) -> &'static str {
        match self {
            InterestKind::Initialization => "initialization",
            InterestKind::Data => "data",
        }
    }

    fn parse(component: &str) -> Option<Self> {
        match component {
            "initialization" => Some(InterestKind::Initialization),
            "data" => Some(InterestKind::Data),
            _ => None,
        }
    }
}

impl fmt::Display for InterestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_component())
    }
}

/// An ordered sequence of name components.
///
/// Position 0 is the destination node prefix, position 1 is the
/// dot-separated leaf list, position `-2` is the [`InterestKind`] and
/// position `-1` is the iteration sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    components: Vec<String>,
}

impl Name {
    pub fn from_components(components: Vec<String>) -> Self {
        Self { components }
    }

    /// Build the canonical sub-interest name for a child covering `leaves`.
    pub fn sub_interest(child_prefix: &str, leaves: &[String], kind: InterestKind, seq: u64) -> Self {
        Self {
            components: vec![
                child_prefix.to_owned(),
                leaves.join("."),
                kind.as_component().to_owned(),
                seq.to_string(),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Component access with ndn-style negative indexing: `-1` is the last
    /// component, `-2` the second to last, etc.
    pub fn get(&self, index: isize) -> Option<&str> {
        let len = self.components.len() as isize;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return None;
        }
        self.components.get(idx as usize).map(String::as_str)
    }

    pub fn destination(&self) -> Option<&str> {
        self.get(0)
    }

    /// The dot-separated leaf list at position 1, split back into ids.
    pub fn leaves(&self) -> Vec<String> {
        self.get(1)
            .map(|s| s.split('.').map(str::to_owned).collect())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> Option<InterestKind> {
        self.get(-2).and_then(InterestKind::parse)
    }

    pub fn sequence(&self) -> Option<u64> {
        self.get(-1).and_then(|s| s.parse().ok())
    }

    pub fn to_uri(&self) -> String {
        format!("/{}", self.components.join("/"))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}
