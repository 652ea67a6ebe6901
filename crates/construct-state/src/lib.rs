//! The persistent, content-addressed state tree (§4.5).
//!
//! A room's state at any event is a root hash into this tree: an immutable
//! mapping from `(event_type, state_key)` to the `event_id` that last set
//! it. Every `insert`/`remove` copies only the nodes on the path to the
//! touched leaf and returns a new root; prior roots keep denoting exactly
//! what they denoted before, which is what lets the kernel hold many
//! rooms' worth of state history in one column without ever rewriting it.

pub mod node;
pub mod store;
pub mod tree;

pub use node::{type_lower_bound, Node, StateKey};
pub use store::{hash_node, InMemoryNodeStore, NodeStore, WriteBatch};
pub use tree::{count, dfs, for_each, get, insert, remove, root_hash_of, EMPTY_ROOT, NODE_MAX_KEYS};
