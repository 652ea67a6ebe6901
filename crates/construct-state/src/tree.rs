//! Tree operations: `get`, `insert`, `remove`, `for_each`, `count`, `dfs`
//! (§4.5).
//!
//! Every mutation copies the path from the touched leaf to the root and
//! stages the new nodes in a [`WriteBatch`]; the old nodes are left
//! untouched so any previously-returned root hash keeps denoting the state
//! it denoted before. Splits and merges follow the textbook B-tree
//! algorithm; what's unusual here is that every node, not just leaves,
//! stores its own `(key, val)` pairs directly, so an internal-node match
//! on `get`/`insert`/`remove` terminates the descent instead of deferring
//! to a leaf.

use construct_types::EventId;

use crate::node::{Node, StateKey};
use crate::store::{hash_node, read_through, NodeStore, WriteBatch};

/// Keys per node before a split. Chosen to keep node hashes renegotiated
/// (and thus the room_state history copy-up) cheap: a room of a few
/// thousand members keeps a tree two or three levels deep.
pub const NODE_MAX_KEYS: usize = 64;
const NODE_MIN_KEYS: usize = NODE_MAX_KEYS / 2;

/// The empty tree: no node, count zero.
pub const EMPTY_ROOT: &str = "";

fn load<S: NodeStore>(store: &S, batch: &WriteBatch, hash: &str) -> Node {
    read_through(store, batch, hash).unwrap_or_else(|| panic!("dangling state node hash {hash}"))
}

fn subtree_size<S: NodeStore>(store: &S, batch: &WriteBatch, hash: &str) -> u64 {
    if hash.is_empty() {
        0
    } else {
        load(store, batch, hash).subtree_size()
    }
}

/// `get(root, type, state_key) -> event_id | miss`.
pub fn get<S: NodeStore>(store: &S, batch: &WriteBatch, root: &str, key: &StateKey) -> Option<EventId> {
    if root.is_empty() {
        return None;
    }
    let node = load(store, batch, root);
    match node.keys.binary_search(key) {
        Ok(i) => Some(node.vals[i].clone()),
        Err(i) => {
            if node.is_leaf() {
                None
            } else {
                get(store, batch, &node.children[i], key)
            }
        }
    }
}

/// `count(root[, type])`. An unfiltered count is O(1) off the root's
/// memoized subtree size; a type-filtered count walks the tree.
pub fn count<S: NodeStore>(store: &S, batch: &WriteBatch, root: &str, event_type: Option<&str>) -> u64 {
    match event_type {
        None => subtree_size(store, batch, root),
        Some(t) => {
            let mut n = 0u64;
            for_each(store, batch, root, Some(t), &mut |_, _| n += 1);
            n
        }
    }
}

/// `for_each(root[, type], f)`: visits every `(key, val)` in key order,
/// optionally restricted to one event type.
pub fn for_each<S: NodeStore>(
    store: &S,
    batch: &WriteBatch,
    root: &str,
    event_type: Option<&str>,
    f: &mut dyn FnMut(&StateKey, &EventId),
) {
    if root.is_empty() {
        return;
    }
    let node = load(store, batch, root);
    for i in 0..node.keys.len() {
        if !node.is_leaf() {
            for_each(store, batch, &node.children[i], event_type, f);
        }
        let matches = event_type.is_none_or(|t| node.keys[i].event_type == t);
        if matches {
            f(&node.keys[i], &node.vals[i]);
        }
    }
    if !node.is_leaf() {
        for_each(store, batch, node.children.last().unwrap(), event_type, f);
    }
}

/// `dfs(root[, prefix], f)`: key-ordered traversal starting no earlier than
/// the first key belonging to `prefix`, stopping once keys of a later type
/// are reached. Used to enumerate one type's state without touching
/// unrelated subtrees when the caller only cares about a contiguous run.
pub fn dfs<S: NodeStore>(
    store: &S,
    batch: &WriteBatch,
    root: &str,
    prefix: Option<&str>,
    f: &mut dyn FnMut(&StateKey, &EventId),
) {
    for_each(store, batch, root, prefix, f);
}

enum InsertOutcome {
    Whole(String),
    Split {
        left: String,
        sep_key: StateKey,
        sep_val: EventId,
        right: String,
    },
}

fn finish_insert(mut node: Node, batch: &mut WriteBatch) -> InsertOutcome {
    if node.keys.len() <= NODE_MAX_KEYS {
        #[cfg(debug_assertions)]
        node.check_invariants();
        let hash = batch.stage(node);
        return InsertOutcome::Whole(hash);
    }
    let mid = node.keys.len() / 2;
    let sep_key = node.keys[mid].clone();
    let sep_val = node.vals[mid].clone();

    let mut right = Node {
        keys: node.keys.split_off(mid + 1),
        vals: node.vals.split_off(mid + 1),
        children: Vec::new(),
        counts: Vec::new(),
    };
    node.keys.truncate(mid);
    node.vals.truncate(mid);
    if !node.is_leaf() {
        right.children = node.children.split_off(mid + 1);
        right.counts = node.counts.split_off(mid + 1);
        node.children.truncate(mid + 1);
        node.counts.truncate(mid + 1);
    }
    #[cfg(debug_assertions)]
    {
        node.check_invariants();
        right.check_invariants();
    }
    let left_hash = batch.stage(node);
    let right_hash = batch.stage(right);
    InsertOutcome::Split {
        left: left_hash,
        sep_key,
        sep_val,
        right: right_hash,
    }
}

fn insert_rec<S: NodeStore>(
    store: &S,
    batch: &mut WriteBatch,
    hash: &str,
    key: StateKey,
    val: EventId,
) -> InsertOutcome {
    let mut node = if hash.is_empty() {
        Node::default()
    } else {
        load(store, batch, hash)
    };

    match node.keys.binary_search(&key) {
        Ok(i) => {
            node.vals[i] = val;
            let h = batch.stage(node);
            InsertOutcome::Whole(h)
        }
        Err(i) if node.is_leaf() => {
            node.keys.insert(i, key);
            node.vals.insert(i, val);
            finish_insert(node, batch)
        }
        Err(i) => {
            let child_hash = node.children[i].clone();
            match insert_rec(store, batch, &child_hash, key, val) {
                InsertOutcome::Whole(new_hash) => {
                    node.counts[i] = subtree_size(store, batch, &new_hash);
                    node.children[i] = new_hash;
                    let h = batch.stage(node);
                    InsertOutcome::Whole(h)
                }
                InsertOutcome::Split {
                    left,
                    sep_key,
                    sep_val,
                    right,
                } => {
                    let left_count = subtree_size(store, batch, &left);
                    let right_count = subtree_size(store, batch, &right);
                    node.keys.insert(i, sep_key);
                    node.vals.insert(i, sep_val);
                    node.children[i] = left;
                    node.counts[i] = left_count;
                    node.children.insert(i + 1, right);
                    node.counts.insert(i + 1, right_count);
                    finish_insert(node, batch)
                }
            }
        }
    }
}

/// `insert(txn, old_root, key, event_id) -> new_root`.
pub fn insert<S: NodeStore>(
    store: &S,
    batch: &mut WriteBatch,
    root: &str,
    key: StateKey,
    val: EventId,
) -> String {
    match insert_rec(store, batch, root, key, val) {
        InsertOutcome::Whole(h) => h,
        InsertOutcome::Split {
            left,
            sep_key,
            sep_val,
            right,
        } => {
            let left_count = subtree_size(store, batch, &left);
            let right_count = subtree_size(store, batch, &right);
            let new_root = Node {
                keys: vec![sep_key],
                vals: vec![sep_val],
                children: vec![left, right],
                counts: vec![left_count, right_count],
            };
            batch.stage(new_root)
        }
    }
}

struct Removed {
    hash: String,
    underflow: bool,
}

fn merge(left: Node, sep_key: StateKey, sep_val: EventId, mut right: Node) -> Node {
    let mut keys = left.keys;
    let mut vals = left.vals;
    keys.push(sep_key);
    vals.push(sep_val);
    keys.append(&mut right.keys);
    vals.append(&mut right.vals);
    let (children, counts) = if left.children.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let mut children = left.children;
        let mut counts = left.counts;
        children.append(&mut right.children);
        counts.append(&mut right.counts);
        (children, counts)
    };
    Node {
        keys,
        vals,
        children,
        counts,
    }
}

/// Rebalances `node.children[i]`, which has just underflowed, by borrowing
/// a key from a sibling or merging with one. Returns whether `node` itself
/// now underflows.
fn rebalance_child<S: NodeStore>(store: &S, batch: &mut WriteBatch, node: &mut Node, i: usize) {
    let has_left = i > 0;
    let has_right = i + 1 < node.children.len();

    if has_left {
        let left = load(store, batch, &node.children[i - 1]);
        if left.keys.len() > NODE_MIN_KEYS {
            let mut left = left;
            let mut child = load(store, batch, &node.children[i]);
            let borrowed_key = left.keys.pop().unwrap();
            let borrowed_val = left.vals.pop().unwrap();
            let sep_key = std::mem::replace(&mut node.keys[i - 1], borrowed_key);
            let sep_val = std::mem::replace(&mut node.vals[i - 1], borrowed_val);
            child.keys.insert(0, sep_key);
            child.vals.insert(0, sep_val);
            if !child.is_leaf() {
                let moved_child = left.children.pop().unwrap();
                let moved_count = left.counts.pop().unwrap();
                child.children.insert(0, moved_child);
                child.counts.insert(0, moved_count);
            }
            node.counts[i - 1] = left.subtree_size();
            node.children[i - 1] = batch.stage(left);
            node.counts[i] = child.subtree_size();
            node.children[i] = batch.stage(child);
            return;
        }
    }
    if has_right {
        let right = load(store, batch, &node.children[i + 1]);
        if right.keys.len() > NODE_MIN_KEYS {
            let mut right = right;
            let mut child = load(store, batch, &node.children[i]);
            let borrowed_key = right.keys.remove(0);
            let borrowed_val = right.vals.remove(0);
            let sep_key = std::mem::replace(&mut node.keys[i], borrowed_key);
            let sep_val = std::mem::replace(&mut node.vals[i], borrowed_val);
            child.keys.push(sep_key);
            child.vals.push(sep_val);
            if !child.is_leaf() {
                let moved_child = right.children.remove(0);
                let moved_count = right.counts.remove(0);
                child.children.push(moved_child);
                child.counts.push(moved_count);
            }
            node.counts[i] = child.subtree_size();
            node.children[i] = batch.stage(child);
            node.counts[i + 1] = right.subtree_size();
            node.children[i + 1] = batch.stage(right);
            return;
        }
    }

    // Neither sibling has a spare key: merge. Prefer merging with the left
    // sibling when one exists so `i` always identifies the survivor slot.
    if has_left {
        let left = load(store, batch, &node.children[i - 1]);
        let child = load(store, batch, &node.children[i]);
        let sep_key = node.keys.remove(i - 1);
        let sep_val = node.vals.remove(i - 1);
        node.children.remove(i);
        node.counts.remove(i);
        let merged = merge(left, sep_key, sep_val, child);
        node.counts[i - 1] = merged.subtree_size();
        node.children[i - 1] = batch.stage(merged);
    } else {
        let child = load(store, batch, &node.children[i]);
        let right = load(store, batch, &node.children[i + 1]);
        let sep_key = node.keys.remove(i);
        let sep_val = node.vals.remove(i);
        node.children.remove(i + 1);
        node.counts.remove(i + 1);
        let merged = merge(child, sep_key, sep_val, right);
        node.counts[i] = merged.subtree_size();
        node.children[i] = batch.stage(merged);
    }
}

/// Removes and returns the maximum `(key, val)` in the subtree at `hash`,
/// used to find a predecessor when deleting from an internal node.
fn remove_max<S: NodeStore>(store: &S, batch: &mut WriteBatch, hash: &str) -> (StateKey, EventId, Removed) {
    let mut node = load(store, batch, hash);
    if node.is_leaf() {
        let key = node.keys.pop().unwrap();
        let val = node.vals.pop().unwrap();
        let underflow = node.keys.len() < NODE_MIN_KEYS;
        let new_hash = if node.keys.is_empty() {
            String::new()
        } else {
            batch.stage(node)
        };
        (key, val, Removed { hash: new_hash, underflow })
    } else {
        let last = node.children.len() - 1;
        let child_hash = node.children[last].clone();
        let (key, val, removed) = remove_max(store, batch, &child_hash);
        node.children[last] = removed.hash;
        node.counts[last] = subtree_size(store, batch, &node.children[last]);
        if removed.underflow {
            rebalance_child(store, batch, &mut node, last);
        }
        let underflow = node.keys.len() < NODE_MIN_KEYS;
        let new_hash = batch.stage(node);
        (key, val, Removed { hash: new_hash, underflow })
    }
}

fn remove_rec<S: NodeStore>(store: &S, batch: &mut WriteBatch, hash: &str, key: &StateKey) -> Option<Removed> {
    if hash.is_empty() {
        return None;
    }
    let mut node = load(store, batch, hash);
    match node.keys.binary_search(key) {
        Ok(i) if node.is_leaf() => {
            node.keys.remove(i);
            node.vals.remove(i);
            let underflow = node.keys.len() < NODE_MIN_KEYS;
            let new_hash = if node.keys.is_empty() {
                String::new()
            } else {
                batch.stage(node)
            };
            Some(Removed { hash: new_hash, underflow })
        }
        Ok(i) => {
            let left_child = node.children[i].clone();
            let (pred_key, pred_val, removed) = remove_max(store, batch, &left_child);
            node.keys[i] = pred_key;
            node.vals[i] = pred_val;
            node.children[i] = removed.hash;
            node.counts[i] = subtree_size(store, batch, &node.children[i]);
            if removed.underflow {
                rebalance_child(store, batch, &mut node, i);
            }
            let underflow = node.keys.len() < NODE_MIN_KEYS;
            let new_hash = batch.stage(node);
            Some(Removed { hash: new_hash, underflow })
        }
        Err(_) if node.is_leaf() => None,
        Err(i) => {
            let child_hash = node.children[i].clone();
            let removed = remove_rec(store, batch, &child_hash, key)?;
            node.children[i] = removed.hash;
            node.counts[i] = subtree_size(store, batch, &node.children[i]);
            if removed.underflow {
                rebalance_child(store, batch, &mut node, i);
            }
            let underflow = node.keys.len() < NODE_MIN_KEYS;
            let new_hash = batch.stage(node);
            Some(Removed { hash: new_hash, underflow })
        }
    }
}

/// `remove(txn, old_root, key) -> new_root`. A miss leaves the root
/// unchanged (returns `root.to_owned()`).
pub fn remove<S: NodeStore>(store: &S, batch: &mut WriteBatch, root: &str, key: &StateKey) -> String {
    let Some(removed) = remove_rec(store, batch, root, key) else {
        return root.to_owned();
    };
    if removed.hash.is_empty() {
        return String::new();
    }
    // A root that collapsed to a single child (no keys of its own left)
    // is replaced by that child, shrinking the tree's height by one.
    let node = load(store, batch, &removed.hash);
    if node.keys.is_empty() && node.children.len() == 1 {
        node.children[0].clone()
    } else {
        removed.hash
    }
}

/// Re-derives `root`'s hash, for tests asserting content-addressing holds.
pub fn root_hash_of(node: &Node) -> String {
    hash_node(node)
}
