//! The event store: write pipeline, point lookups, and room-scoped
//! iterators (§4.6).

use std::fs::{File, OpenOptions};
use std::io::{Read, Write as _};
use std::path::Path;

use construct_event::Event;
use construct_runtime::BytesMutPool;
use construct_types::{Depth, EventId, EventIdx, RoomId};
use parking_lot::Mutex;

use crate::columns::Columns;
use crate::error::StoreError;
use crate::record;

/// Options accompanying a single [`EventStore::write`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOpts {
    /// Skip the WAL append; used by tests and by replay itself.
    pub no_log: bool,
}

/// The column event store: one append-only log backing an in-memory set of
/// indexes (§4.6). Durable across restarts via [`EventStore::open`]
/// replaying the log; ephemeral stores ([`EventStore::in_memory`]) skip the
/// log entirely, which is what `construct --ephemeral` and the kernel's
/// unit tests use.
pub struct EventStore {
    columns: Columns,
    log: Option<Mutex<File>>,
    /// Serializes the whole idx-assign + log-append + index sequence in
    /// [`EventStore::write`]. `Columns::next_idx` reads the current max key
    /// under its own short-lived read lock, which by itself guarantees
    /// nothing about two concurrent writers; this is the lock that makes
    /// "assign idx, then claim it" atomic (§1 monotonic indices, §5 totally
    /// ordered commit).
    write_lock: Mutex<()>,
    /// Recycled framing buffers for [`record::encode_into`], since `write`
    /// runs on every commit and otherwise allocates a fresh `Vec` each time.
    frame_pool: BytesMutPool,
}

const FRAME_POOL_SIZE: usize = 8;
const FRAME_POOL_BUFFER_CAPACITY: usize = 4096;

impl EventStore {
    pub fn in_memory() -> Self {
        Self {
            columns: Columns::new(),
            log: None,
            write_lock: Mutex::new(()),
            frame_pool: BytesMutPool::new(FRAME_POOL_SIZE, FRAME_POOL_BUFFER_CAPACITY),
        }
    }

    /// Opens (creating if absent) the log at `path` and replays it to
    /// rebuild every index.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let columns = Columns::new();

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let mut pos = 0;
        while pos < data.len() {
            match record::decode(&data[pos..])? {
                Some((idx, payload, consumed)) => {
                    let value: serde_json::Value = serde_json::from_str(&payload)?;
                    columns.index(idx, &Event::from_value(value));
                    pos += consumed;
                }
                None => break,
            }
        }
        tracing::info!(path = %path.display(), replayed_to = pos, "event log opened");

        Ok(Self {
            columns,
            log: Some(Mutex::new(file)),
            write_lock: Mutex::new(()),
            frame_pool: BytesMutPool::new(FRAME_POOL_SIZE, FRAME_POOL_BUFFER_CAPACITY),
        })
    }

    /// Assigns the next `EventIdx`, appends to the log (unless
    /// `opts.no_log`), and updates every index. Returns the assigned idx.
    ///
    /// This is the WRITE phase of the event VM (§4.7): by the time an
    /// event reaches here it has already passed CONFORM through AUTH, so
    /// `write` itself never rejects. The whole sequence runs under
    /// `write_lock` so two concurrent writers (nothing upstream serializes
    /// admission per room) can never be assigned the same idx.
    pub fn write(&self, event: &Event, opts: WriteOpts) -> Result<EventIdx, StoreError> {
        let _guard = self.write_lock.lock();

        let idx = self.columns.next_idx();
        let payload = construct_crypto::canonicalize(event.value());

        if !opts.no_log {
            if let Some(log) = &self.log {
                let mut buf = self.frame_pool.get();
                record::encode_into(&mut buf, idx, &payload);
                let mut log = log.lock();
                log.write_all(&buf)?;
                log.flush()?;
                drop(log);
                self.frame_pool.put(buf);
            }
        }

        self.columns.index(idx, event);
        if let Some(room_id) = event.room_id() {
            self.columns.recompute_heads(&room_id, event);
        }
        Ok(idx)
    }

    pub fn mark_bad(&self, event_id: EventId) {
        self.columns.mark_bad(event_id);
    }

    pub fn is_bad(&self, event_id: &EventId) -> bool {
        self.columns.is_bad(event_id)
    }

    /// `fetch(event_id) -> Event`, by way of the `event_id` index.
    pub fn fetch_by_id(&self, event_id: &EventId) -> Option<Event> {
        let idx = self.columns.idx_of(event_id)?;
        self.fetch(idx)
    }

    /// `fetch(event_idx) -> Event`.
    pub fn fetch(&self, idx: EventIdx) -> Option<Event> {
        let json = self.columns.get_event_json(idx)?;
        let value: serde_json::Value = serde_json::from_str(&json).ok()?;
        Some(Event::from_value(value))
    }

    pub fn idx_of(&self, event_id: &EventId) -> Option<EventIdx> {
        self.columns.idx_of(event_id)
    }

    /// `query(room_id, type, state_key) -> event_id | miss`, a point read
    /// against the flattened `room_state` index (kept in step with the
    /// state tree's current root by the kernel).
    pub fn query_state(&self, room_id: &RoomId, event_type: &str, state_key: &str) -> Option<Event> {
        let idx = self.columns.room_state_idx(room_id, event_type, state_key)?;
        self.fetch(idx)
    }

    pub fn state_root(&self, room_id: &RoomId) -> Option<String> {
        self.columns.room_state_root(room_id)
    }

    pub fn set_state_root(&self, room_id: RoomId, root: String) {
        self.columns.set_room_state_root(room_id, root);
    }

    /// Current forward extremities, i.e. the events the next event in this
    /// room should list as `prev_events` (§4.7 ACCESS phase).
    pub fn heads(&self, room_id: &RoomId) -> Vec<EventId> {
        self.columns.room_heads(room_id)
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.columns.room_ids()
    }

    /// Persists a [`construct_state::WriteBatch`]'s staged nodes into the
    /// `state_node` column. The log doesn't carry state nodes separately:
    /// they're content-addressed and rederivable from room history, so
    /// losing them costs a state-tree rebuild, never data (§4.5, §4.6).
    pub fn commit_state_batch(&self, batch: construct_state::WriteBatch) {
        for (hash, json) in batch.into_writes() {
            self.columns.put_state_node(hash, json);
        }
    }
}

impl construct_state::NodeStore for EventStore {
    fn get_node(&self, hash: &str) -> Option<construct_state::Node> {
        construct_state::NodeStore::get_node(&self.columns, hash)
    }
}

/// Room-scoped read iterators (§4.6): `room::events`, `room::state`,
/// `room::members`, `room::origins`.
pub mod room {
    use super::{Columns, Depth, Event, RoomId};
    use construct_types::Host;

    /// Events with `from <= depth <= to`, depth-then-commit-order.
    pub fn events(store: &super::EventStore, room_id: &RoomId, from: Depth, to: Depth) -> Vec<Event> {
        store
            .columns
            .room_events_between(room_id, from, to)
            .into_iter()
            .filter_map(|idx| store.fetch(idx))
            .collect()
    }

    pub fn event_count(columns: &Columns, room_id: &RoomId) -> usize {
        columns.room_event_count(room_id)
    }

    /// Every current state event in the room, in `(type, state_key)` order.
    pub fn state(store: &super::EventStore, room_id: &RoomId) -> Vec<Event> {
        store
            .columns
            .room_state_idxs(room_id)
            .into_iter()
            .filter_map(|idx| store.fetch(idx))
            .collect()
    }

    /// Current `m.room.member` state events.
    pub fn members(store: &super::EventStore, room_id: &RoomId) -> Vec<Event> {
        store
            .columns
            .room_member_idxs(room_id)
            .into_iter()
            .filter_map(|idx| store.fetch(idx))
            .collect()
    }

    /// Servers observed participating in the room, for federation fanout.
    pub fn origins(store: &super::EventStore, room_id: &RoomId) -> Vec<Host> {
        store.columns.room_origins(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn event(room: &str, idx: i64, etype: &str, id: &str) -> Event {
        Event::from_value(json!({
            "event_id": id,
            "room_id": room,
            "type": etype,
            "depth": idx,
        }))
    }

    #[test]
    fn write_then_fetch_round_trips() {
        let store = EventStore::in_memory();
        let e = event("!r:x", 0, "m.room.create", "$a:x");
        let idx = store.write(&e, WriteOpts::default()).unwrap();
        let fetched = store.fetch(idx).unwrap();
        assert_eq!(fetched.event_id(), e.event_id());
        assert_eq!(
            store.fetch_by_id(&EventId::new_unchecked("$a:x")).unwrap().event_id(),
            e.event_id()
        );
    }

    #[test]
    fn idx_is_monotonic_across_writes() {
        let store = EventStore::in_memory();
        let a = store.write(&event("!r:x", 0, "m.room.create", "$a:x"), WriteOpts::default()).unwrap();
        let b = store.write(&event("!r:x", 1, "m.room.message", "$b:x"), WriteOpts::default()).unwrap();
        assert!(b.get() > a.get());
    }

    #[test]
    fn heads_track_forward_extremities() {
        let store = EventStore::in_memory();
        let room = RoomId::new_unchecked("!r:x");
        let create = Event::from_value(json!({"event_id": "$a:x", "room_id": "!r:x", "type": "m.room.create", "depth": 0}));
        store.write(&create, WriteOpts::default()).unwrap();
        assert_eq!(store.heads(&room), vec![EventId::new_unchecked("$a:x")]);

        let msg = Event::from_value(json!({
            "event_id": "$b:x", "room_id": "!r:x", "type": "m.room.message", "depth": 1,
            "prev_events": [["$a:x", {}]],
        }));
        store.write(&msg, WriteOpts::default()).unwrap();
        assert_eq!(store.heads(&room), vec![EventId::new_unchecked("$b:x")]);
    }

    #[test]
    fn log_replay_reconstructs_indexes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        {
            let store = EventStore::open(&path).unwrap();
            store.write(&event("!r:x", 0, "m.room.create", "$a:x"), WriteOpts::default()).unwrap();
            store.write(&event("!r:x", 1, "m.room.message", "$b:x"), WriteOpts::default()).unwrap();
        }
        let reopened = EventStore::open(&path).unwrap();
        assert!(reopened.fetch_by_id(&EventId::new_unchecked("$a:x")).is_some());
        assert!(reopened.fetch_by_id(&EventId::new_unchecked("$b:x")).is_some());
        assert_eq!(reopened.idx_of(&EventId::new_unchecked("$b:x")).unwrap().get(), 2);
    }

    #[test]
    fn state_batches_persist_into_the_node_column() {
        use construct_state::{NodeStore as _, StateKey};

        let store = EventStore::in_memory();
        let mut batch = construct_state::WriteBatch::new();
        let root = construct_state::insert(
            &store,
            &mut batch,
            construct_state::EMPTY_ROOT,
            StateKey::new("m.room.create", ""),
            EventId::new_unchecked("$a:x"),
        );
        store.commit_state_batch(batch);

        let fresh_batch = construct_state::WriteBatch::new();
        let val = construct_state::get(&store, &fresh_batch, &root, &StateKey::new("m.room.create", ""));
        assert_eq!(val, Some(EventId::new_unchecked("$a:x")));
        assert!(store.get_node(&root).is_some());
    }

    #[test]
    fn concurrent_writes_never_collide_on_the_same_idx() {
        let store = EventStore::in_memory();
        let room = "!r:x";
        std::thread::scope(|scope| {
            for n in 0..16 {
                let store = &store;
                scope.spawn(move || {
                    let id = format!("$t{n}:x");
                    store.write(&event(room, n, "m.room.message", &id), WriteOpts::default()).unwrap();
                });
            }
        });
        let idxs: std::collections::HashSet<_> = (0..16)
            .map(|n| store.idx_of(&EventId::new_unchecked(&format!("$t{n}:x"))).unwrap())
            .collect();
        assert_eq!(idxs.len(), 16, "every concurrent write landed on a distinct idx");
    }

    #[test]
    fn bad_events_are_remembered() {
        let store = EventStore::in_memory();
        let id = EventId::new_unchecked("$bad:x");
        assert!(!store.is_bad(&id));
        store.mark_bad(id.clone());
        assert!(store.is_bad(&id));
    }
}
