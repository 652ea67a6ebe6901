//! The on-disk/on-wire node representation (§4.5).
//!
//! Node representation is a single canonical-JSON object with members
//! `key`, `val`, `child`, `count`. Nodes are immutable: any modification
//! copies a path from leaf to root and writes new nodes. The empty root is
//! the empty string.

use construct_types::EventId;
use serde::{Deserialize, Serialize};

/// `(type, state_key)`, the ordering unit of the tree.
///
/// `Ord` is derived over `(event_type, state_key)` lexicographically, which
/// matches "lexicographic compare is by string compare of each element"
/// for two full keys (§4.5). Range queries bounded by type alone use
/// [`TypeBound`] instead, which additionally orders a bare-type bound
/// before any full key sharing that type ("shorter prefixes order before
/// longer ones").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    pub event_type: String,
    pub state_key: String,
}

impl StateKey {
    pub fn new(event_type: impl Into<String>, state_key: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            state_key: state_key.into(),
        }
    }
}

impl Serialize for StateKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (&self.event_type, &self.state_key).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (event_type, state_key): (String, String) = Deserialize::deserialize(deserializer)?;
        Ok(Self {
            event_type,
            state_key,
        })
    }
}

/// A lower bound used when iterating all state of a given type, ordering
/// before any full `StateKey` that shares the same `event_type`.
pub fn type_lower_bound(event_type: &str, key: &StateKey) -> std::cmp::Ordering {
    match event_type.cmp(&key.event_type) {
        std::cmp::Ordering::Equal => std::cmp::Ordering::Less,
        other => other,
    }
}

/// A single node of the tree: up to `NODE_MAX_KEY` sorted keys, the same
/// number of `vals`, and either zero children (a leaf) or `keys.len() + 1`
/// children (internal), each a base64 hash of a child node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "key")]
    pub keys: Vec<StateKey>,
    #[serde(rename = "val")]
    pub vals: Vec<EventId>,
    #[serde(rename = "child")]
    pub children: Vec<String>,
    #[serde(rename = "count")]
    pub counts: Vec<u64>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Total `(key, val)` entries in the subtree rooted at this node,
    /// including its own entries.
    pub fn subtree_size(&self) -> u64 {
        self.keys.len() as u64 + self.counts.iter().sum::<u64>()
    }

    /// Debug-only structural invariants (§4.5 "Correctness invariants").
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        debug_assert_eq!(self.keys.len(), self.vals.len(), "keys==vals");
        debug_assert!(
            self.children.is_empty() || self.children.len() == self.keys.len() + 1,
            "children must be empty (leaf) or keys+1 (internal)"
        );
        debug_assert_eq!(
            self.children.len(),
            self.counts.len(),
            "one count per child"
        );
        for w in self.keys.windows(2) {
            debug_assert!(w[0] < w[1], "no duplicate or out-of-order keys");
        }
    }
}
