//! Content-addressing and the pending write batch (§4.5).

use std::collections::HashMap;

use crate::node::Node;

/// Hashes `node`'s canonical JSON; this is the node's id.
pub fn hash_node(node: &Node) -> String {
    let value = serde_json::to_value(node).expect("Node serializes infallibly");
    let canon = construct_crypto::canonicalize(&value);
    construct_crypto::sha256_base64_unpadded(canon.as_bytes())
}

/// Read access to previously-committed nodes.
///
/// Implemented by the event store (§4.6) over its `state_node` column;
/// tests use [`InMemoryNodeStore`].
pub trait NodeStore {
    fn get_node(&self, hash: &str) -> Option<Node>;
}

impl<T: NodeStore + ?Sized> NodeStore for &T {
    fn get_node(&self, hash: &str) -> Option<Node> {
        (**self).get_node(hash)
    }
}

/// Nodes staged by one `insert`/`remove` call (or a chain of them) but not
/// yet committed. The batch is written atomically by the committing
/// pipeline (§4.6 phase WRITE), so a caller that reads through a batch
/// before commit never observes a torn write.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    staged: HashMap<String, Node>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `node` and stages it, returning its id. Idempotent: staging
    /// the same node content twice returns the same hash and is a no-op.
    pub fn stage(&mut self, node: Node) -> String {
        let hash = hash_node(&node);
        self.staged.entry(hash.clone()).or_insert(node);
        hash
    }

    pub fn get(&self, hash: &str) -> Option<&Node> {
        self.staged.get(hash)
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Drains the batch into `(hash, canonical_json)` pairs ready for an
    /// atomic write to the `state_node` column (§4.6, §6).
    pub fn into_writes(self) -> Vec<(String, String)> {
        self.staged
            .into_iter()
            .map(|(hash, node)| {
                let value = serde_json::to_value(&node).expect("infallible");
                (hash, construct_crypto::canonicalize(&value))
            })
            .collect()
    }
}

/// Looks a node up in the batch first (read-your-writes within one
/// evaluation), falling back to the committed store.
pub(crate) fn read_through<S: NodeStore>(store: &S, batch: &WriteBatch, hash: &str) -> Option<Node> {
    if hash.is_empty() {
        return None;
    }
    batch.get(hash).cloned().or_else(|| store.get_node(hash))
}

/// An in-memory [`NodeStore`], used by tests and by `construct --ephemeral`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeStore {
    nodes: HashMap<String, Node>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch's writes as if the committing pipeline had persisted
    /// them (§4.6's "the batch is written atomically by the committing
    /// pipeline").
    pub fn apply(&mut self, batch: WriteBatch) {
        self.nodes.extend(batch.staged);
    }
}

impl NodeStore for InMemoryNodeStore {
    fn get_node(&self, hash: &str) -> Option<Node> {
        self.nodes.get(hash).cloned()
    }
}
