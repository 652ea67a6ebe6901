//! The event tuple (§3).
//!
//! An [`Event`] is a thin, typed view over a `serde_json::Value`, not a
//! strict struct: conformance (§4.4) must be able to run against events
//! whose fields are missing or the wrong type, defaulting each to its
//! typed empty (empty string, empty object, `0` for depth) rather than
//! failing to parse. A rigid `#[derive(Deserialize)]` struct would reject
//! such an event before conformance ever saw it.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use construct_types::{Depth, EventId, Host, RoomId, Timestamp, UserId};
use serde_json::{Map, Value};

/// One entry of `auth_events` / `prev_events` / `prev_state`: an event id
/// paired with the referencing event's belief about that event's hashes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrevRef {
    pub event_id: EventId,
    pub hashes: BTreeMap<String, String>,
}

impl PrevRef {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            hashes: BTreeMap::new(),
        }
    }

    /// Parses a `[event_id, {hashes}]` wire tuple.
    fn from_value(v: &Value) -> Option<Self> {
        let arr = v.as_array()?;
        let id = arr.first()?.as_str()?;
        let hashes = arr
            .get(1)
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            event_id: EventId::new_unchecked(id),
            hashes,
        })
    }

    fn to_value(&self) -> Value {
        let hashes: Map<String, Value> = self
            .hashes
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Array(vec![
            Value::String(self.event_id.as_str().to_owned()),
            Value::Object(hashes),
        ])
    }
}

fn prev_list(v: &Value, member: &str) -> Vec<PrevRef> {
    v.get(member)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(PrevRef::from_value).collect())
        .unwrap_or_default()
}

fn str_map(v: &Value, member: &str) -> BTreeMap<String, String> {
    v.get(member)
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}

/// A flyweight view over an event's canonical JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Event(Value);

impl Event {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn obj_mut(&mut self) -> &mut Map<String, Value> {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        self.0.as_object_mut().expect("just ensured object")
    }

    // -- typed getters, each defaulting to its typed empty -----------------

    pub fn event_id(&self) -> Option<EventId> {
        self.0
            .get("event_id")
            .and_then(Value::as_str)
            .map(EventId::new_unchecked)
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.0
            .get("room_id")
            .and_then(Value::as_str)
            .map(RoomId::new_unchecked)
    }

    pub fn sender(&self) -> Option<UserId> {
        self.0
            .get("sender")
            .and_then(Value::as_str)
            .map(UserId::new_unchecked)
    }

    pub fn origin(&self) -> Option<Host> {
        self.0
            .get("origin")
            .and_then(Value::as_str)
            .map(Host::from)
    }

    pub fn event_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("")
    }

    /// `None` means this is not a state event; `Some("")` is a valid,
    /// present, empty state key.
    pub fn state_key(&self) -> Option<&str> {
        self.0.get("state_key").and_then(Value::as_str)
    }

    pub fn is_state(&self) -> bool {
        self.state_key().is_some()
    }

    pub fn origin_server_ts(&self) -> Timestamp {
        Timestamp::from_millis(
            self.0
                .get("origin_server_ts")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        )
    }

    /// Raw depth as signed so a negative wire value can still be observed
    /// and flagged rather than silently clamped (§4.4 `DEPTH_NEGATIVE`).
    pub fn depth_raw(&self) -> i64 {
        self.0.get("depth").and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn depth(&self) -> Depth {
        Depth::new(self.depth_raw())
    }

    pub fn content(&self) -> &Value {
        static EMPTY: LazyLock<Value> = LazyLock::new(|| Value::Object(Map::new()));
        self.0.get("content").unwrap_or(&EMPTY)
    }

    pub fn hashes(&self) -> BTreeMap<String, String> {
        str_map(&self.0, "hashes")
    }

    pub fn signatures(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.0
            .get("signatures")
            .and_then(Value::as_object)
            .map(|hosts| {
                hosts
                    .iter()
                    .map(|(host, keys)| {
                        let keys = keys
                            .as_object()
                            .map(|m| {
                                m.iter()
                                    .filter_map(|(k, v)| {
                                        v.as_str().map(|s| (k.clone(), s.to_owned()))
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        (host.clone(), keys)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn auth_events(&self) -> Vec<PrevRef> {
        prev_list(&self.0, "auth_events")
    }

    pub fn prev_events(&self) -> Vec<PrevRef> {
        prev_list(&self.0, "prev_events")
    }

    pub fn prev_state(&self) -> Vec<PrevRef> {
        prev_list(&self.0, "prev_state")
    }

    pub fn redacts(&self) -> Option<EventId> {
        self.0
            .get("redacts")
            .and_then(Value::as_str)
            .map(EventId::new_unchecked)
    }

    /// `membership`, checked at top level then under `content` (§4.4).
    pub fn membership(&self) -> Option<&str> {
        self.0
            .get("membership")
            .and_then(Value::as_str)
            .or_else(|| self.content().get("membership").and_then(Value::as_str))
    }

    // -- setters used by the write phases of the VM -------------------------

    pub fn set_event_id(&mut self, id: &EventId) {
        self.obj_mut()
            .insert("event_id".into(), Value::String(id.as_str().to_owned()));
    }

    pub fn set_hashes(&mut self, hashes: &BTreeMap<String, String>) {
        let obj: Map<String, Value> = hashes
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.obj_mut().insert("hashes".into(), Value::Object(obj));
    }

    pub fn merge_signature(&mut self, host: &str, keyid: &str, signature_base64: &str) {
        let sig_obj = self
            .obj_mut()
            .entry("signatures")
            .or_insert_with(|| Value::Object(Map::new()));
        if !sig_obj.is_object() {
            *sig_obj = Value::Object(Map::new());
        }
        let by_host = sig_obj
            .as_object_mut()
            .expect("just ensured object")
            .entry(host.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !by_host.is_object() {
            *by_host = Value::Object(Map::new());
        }
        by_host.as_object_mut().expect("just ensured object").insert(
            keyid.to_owned(),
            Value::String(signature_base64.to_owned()),
        );
    }

    pub fn set_depth(&mut self, depth: Depth) {
        self.obj_mut()
            .insert("depth".into(), Value::from(depth.get()));
    }

    pub fn set_origin_server_ts(&mut self, ts: Timestamp) {
        self.obj_mut()
            .insert("origin_server_ts".into(), Value::from(ts.as_millis()));
    }

    pub fn set_prev_events(&mut self, refs: &[PrevRef]) {
        self.obj_mut().insert(
            "prev_events".into(),
            Value::Array(refs.iter().map(PrevRef::to_value).collect()),
        );
    }

    pub fn set_auth_events(&mut self, refs: &[PrevRef]) {
        self.obj_mut().insert(
            "auth_events".into(),
            Value::Array(refs.iter().map(PrevRef::to_value).collect()),
        );
    }

    pub fn set_content(&mut self, content: Value) {
        self.obj_mut().insert("content".into(), content);
    }

    /// Serialized size in bytes of the event as it currently stands.
    pub fn serialized_len(&self) -> usize {
        construct_crypto::canonicalize(&self.0).len()
    }
}
