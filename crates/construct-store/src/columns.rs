//! In-memory column indexes (§4.6).
//!
//! Each column answers one access pattern. `event` is authoritative; the
//! others are derived and rebuilt on [`crate::store::EventStore::open`]
//! replay, so losing one to a bug never loses data, only an index.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use construct_event::Event;
use construct_types::{Depth, EventId, EventIdx, Host, RoomId};
use parking_lot::RwLock;

/// `room_events`' sort key: DAG depth first, then commit order, so an
/// ascending scan yields an order consistent with a topological one.
pub type RoomEventKey = (Depth, EventIdx);

#[derive(Default)]
pub struct Columns {
    /// `event_idx -> canonical event JSON`. The authoritative column.
    pub(crate) event: RwLock<BTreeMap<EventIdx, String>>,
    /// `event_id -> event_idx`.
    pub(crate) event_id: RwLock<HashMap<EventId, EventIdx>>,
    /// Events that failed conformance or auth, kept so repeated federation
    /// pushes of the same poison pill short-circuit instead of re-running
    /// the pipeline (§4.7 "WRITE" / §8 property: rejects are remembered).
    pub(crate) event_bad: RwLock<HashSet<EventId>>,
    /// `room_id -> (depth, idx) -> event_idx`, this room's full history.
    pub(crate) room_events: RwLock<HashMap<RoomId, BTreeMap<RoomEventKey, EventIdx>>>,
    /// `room_id -> (type, state_key) -> idx`, current flattened state,
    /// mirroring the room's live state-tree root for point queries that
    /// don't need the tree (§4.5/§4.6).
    pub(crate) room_state: RwLock<HashMap<RoomId, BTreeMap<(String, String), EventIdx>>>,
    /// `room_id -> state tree root hash` (§4.5).
    pub(crate) room_state_root: RwLock<HashMap<RoomId, String>>,
    /// `room_id -> servers observed to have participated`, used to pick
    /// federation fanout targets (§6).
    pub(crate) room_origins: RwLock<HashMap<RoomId, BTreeSet<Host>>>,
    /// `room_id -> current forward extremities` (§4.7 ACCESS phase).
    pub(crate) room_heads: RwLock<HashMap<RoomId, BTreeSet<EventId>>>,
    /// `node hash -> canonical JSON`, the state tree's node column (§4.5).
    pub(crate) state_node: RwLock<HashMap<String, String>>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_idx(&self) -> EventIdx {
        self.event
            .read()
            .keys()
            .next_back()
            .map_or(EventIdx::new(1), |idx| idx.next())
    }

    pub fn get_event_json(&self, idx: EventIdx) -> Option<String> {
        self.event.read().get(&idx).cloned()
    }

    pub fn idx_of(&self, event_id: &EventId) -> Option<EventIdx> {
        self.event_id.read().get(event_id).copied()
    }

    pub fn is_bad(&self, event_id: &EventId) -> bool {
        self.event_bad.read().contains(event_id)
    }

    pub fn mark_bad(&self, event_id: EventId) {
        self.event_bad.write().insert(event_id);
    }

    /// Replays one previously-logged event back into every index, as if it
    /// had just been written. Used both by WAL recovery and by ordinary
    /// writes.
    pub fn index(&self, idx: EventIdx, event: &Event) {
        self.event.write().insert(idx, construct_crypto::canonicalize(event.value()));
        if let Some(id) = event.event_id() {
            self.event_id.write().insert(id, idx);
        }
        let Some(room_id) = event.room_id() else {
            return;
        };
        self.room_events
            .write()
            .entry(room_id.clone())
            .or_default()
            .insert((event.depth(), idx), idx);
        if let Some(state_key) = event.state_key() {
            self.room_state
                .write()
                .entry(room_id.clone())
                .or_default()
                .insert((event.event_type().to_owned(), state_key.to_owned()), idx);
        }
        if let Some(origin) = event.origin() {
            self.room_origins
                .write()
                .entry(room_id.clone())
                .or_default()
                .insert(origin);
        }
    }

    pub fn room_events_between(
        &self,
        room_id: &RoomId,
        from: Depth,
        to: Depth,
    ) -> Vec<EventIdx> {
        self.room_events
            .read()
            .get(room_id)
            .map(|m| {
                m.range((from, EventIdx::new(0))..=(to, EventIdx::new(u64::MAX)))
                    .map(|(_, idx)| *idx)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn room_event_count(&self, room_id: &RoomId) -> usize {
        self.room_events.read().get(room_id).map_or(0, BTreeMap::len)
    }

    /// Every room this store has ever seen an event for, for federation
    /// surfaces that need to enumerate rooms (e.g. `publicRooms`).
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.room_events.read().keys().cloned().collect()
    }

    pub fn room_state_idx(&self, room_id: &RoomId, event_type: &str, state_key: &str) -> Option<EventIdx> {
        self.room_state
            .read()
            .get(room_id)?
            .get(&(event_type.to_owned(), state_key.to_owned()))
            .copied()
    }

    pub fn room_state_idxs(&self, room_id: &RoomId) -> Vec<EventIdx> {
        self.room_state
            .read()
            .get(room_id)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_member_idxs(&self, room_id: &RoomId) -> Vec<EventIdx> {
        self.room_state
            .read()
            .get(room_id)
            .map(|m| {
                m.iter()
                    .filter(|((t, _), _)| t == "m.room.member")
                    .map(|(_, idx)| *idx)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn room_origins(&self, room_id: &RoomId) -> Vec<Host> {
        self.room_origins
            .read()
            .get(room_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_state_root(&self, room_id: &RoomId) -> Option<String> {
        self.room_state_root.read().get(room_id).cloned()
    }

    pub fn set_room_state_root(&self, room_id: RoomId, root: String) {
        self.room_state_root.write().insert(room_id, root);
    }

    pub fn room_heads(&self, room_id: &RoomId) -> Vec<EventId> {
        self.room_heads
            .read()
            .get(room_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Recomputes forward extremities: drop every event any other indexed
    /// event lists as a `prev_event`, keep the rest (§4.7 ACCESS phase 2).
    pub fn recompute_heads(&self, room_id: &RoomId, new_event: &Event) {
        let Some(new_id) = new_event.event_id() else {
            return;
        };
        let mut heads = self.room_heads.write();
        let set = heads.entry(room_id.clone()).or_default();
        for prev in new_event.prev_events() {
            set.remove(&prev.event_id);
        }
        set.insert(new_id);
    }

    pub fn get_state_node(&self, hash: &str) -> Option<String> {
        self.state_node.read().get(hash).cloned()
    }

    pub fn put_state_node(&self, hash: String, canonical_json: String) {
        self.state_node.write().entry(hash).or_insert(canonical_json);
    }
}

impl construct_state::NodeStore for Columns {
    fn get_node(&self, hash: &str) -> Option<construct_state::Node> {
        let json = self.get_state_node(hash)?;
        serde_json::from_str(&json).ok()
    }
}
