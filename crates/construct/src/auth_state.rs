//! Assembles a [`RoomAuthState`] snapshot from a room's flattened current
//! state (§4.7: "the caller assembles this from the state tree"). The
//! kernel never reads the store itself, so this is the one place a room's
//! persisted `m.room.create` / `m.room.join_rules` / `m.room.power_levels`
//! / `m.room.member` events turn into the auth snapshot `evaluate` needs.

use construct_kernel::{PowerLevels, RoomAuthState};
use construct_store::{room, EventStore};
use construct_types::{RoomId, UserId};
use serde_json::Value;

fn power_levels_from_content(content: &Value) -> PowerLevels {
    let mut pl = PowerLevels::default();

    if let Some(v) = content.get("users_default").and_then(Value::as_i64) {
        pl.users_default = v;
    }
    if let Some(v) = content.get("events_default").and_then(Value::as_i64) {
        pl.events_default = v;
    }
    if let Some(v) = content.get("state_default").and_then(Value::as_i64) {
        pl.state_default = v;
    }
    if let Some(v) = content.get("invite").and_then(Value::as_i64) {
        pl.invite = v;
    }
    if let Some(v) = content.get("kick").and_then(Value::as_i64) {
        pl.kick = v;
    }
    if let Some(v) = content.get("ban").and_then(Value::as_i64) {
        pl.ban = v;
    }
    if let Some(v) = content.get("redact").and_then(Value::as_i64) {
        pl.redact = v;
    }
    if let Some(users) = content.get("users").and_then(Value::as_object) {
        for (user, level) in users {
            if let Some(level) = level.as_i64() {
                pl.users.insert(UserId::new_unchecked(user.clone()), level);
            }
        }
    }
    if let Some(events) = content.get("events").and_then(Value::as_object) {
        for (event_type, level) in events {
            if let Some(level) = level.as_i64() {
                pl.events.insert(event_type.clone(), level);
            }
        }
    }

    pl
}

/// Builds the current auth-relevant snapshot for `room_id`. Rooms the
/// store has never seen yield a fresh (no-create) state, which rejects
/// everything except an `m.room.create`.
pub fn current(store: &EventStore, room_id: &RoomId) -> RoomAuthState {
    let mut state = RoomAuthState::default();

    let create_event = store.query_state(room_id, "m.room.create", "");
    state.has_create = create_event.is_some();
    let Some(create_event) = create_event else {
        return state;
    };
    state.creator = create_event
        .content()
        .get("creator")
        .and_then(Value::as_str)
        .map(UserId::new_unchecked)
        .or_else(|| create_event.sender());

    if let Some(join_rules) = store.query_state(room_id, "m.room.join_rules", "") {
        state.join_rule = join_rules
            .content()
            .get("join_rule")
            .and_then(Value::as_str)
            .unwrap_or("invite")
            .to_owned();
    } else {
        state.join_rule = "invite".to_owned();
    }

    if let Some(power_levels) = store.query_state(room_id, "m.room.power_levels", "") {
        state.power_levels = power_levels_from_content(power_levels.content());
        state.has_power_levels_event = true;
    }

    for member_event in room::members(store, room_id) {
        let Some(state_key) = member_event.state_key() else {
            continue;
        };
        let Some(membership) = member_event.membership() else {
            continue;
        };
        state.members.insert(UserId::new_unchecked(state_key), membership.to_owned());
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use construct_store::WriteOpts;
    use serde_json::json;

    #[test]
    fn fresh_room_has_no_create() {
        let store = EventStore::in_memory();
        let state = current(&store, &RoomId::new_unchecked("!none:x"));
        assert!(!state.has_create);
    }

    #[test]
    fn assembles_join_rule_power_levels_and_members() {
        let store = EventStore::in_memory();
        let room = RoomId::new_unchecked("!r:x");

        store
            .write(
                &construct_event::Event::from_value(json!({
                    "event_id": "$create:x", "room_id": "!r:x", "type": "m.room.create",
                    "state_key": "", "sender": "@a:x", "content": {"creator": "@a:x"},
                })),
                WriteOpts::default(),
            )
            .unwrap();

        let events = [
            json!({"event_id": "$jr:x", "room_id": "!r:x", "type": "m.room.join_rules", "state_key": "", "content": {"join_rule": "public"}}),
            json!({"event_id": "$pl:x", "room_id": "!r:x", "type": "m.room.power_levels", "state_key": "", "content": {"kick": 75, "users": {"@a:x": 100}}}),
            json!({"event_id": "$ma:x", "room_id": "!r:x", "type": "m.room.member", "state_key": "@a:x", "content": {"membership": "join"}}),
        ];
        for e in events {
            let event = construct_event::Event::from_value(e);
            store.write(&event, WriteOpts::default()).unwrap();
        }

        let state = current(&store, &room);
        assert!(state.has_create);
        assert_eq!(state.join_rule, "public");
        assert_eq!(state.power_levels.kick, 75);
        assert_eq!(state.power_levels.power_of(&UserId::new_unchecked("@a:x")), 100);
        assert_eq!(state.membership_of(&UserId::new_unchecked("@a:x")), "join");
        assert!(state.has_power_levels_event);
        assert_eq!(state.creator, Some(UserId::new_unchecked("@a:x")));
    }

    #[test]
    fn creator_has_implicit_power_before_power_levels_event_is_written() {
        let store = EventStore::in_memory();
        let room = RoomId::new_unchecked("!r:x");
        store
            .write(
                &construct_event::Event::from_value(json!({
                    "event_id": "$create:x", "room_id": "!r:x", "type": "m.room.create",
                    "state_key": "", "sender": "@a:x", "content": {"creator": "@a:x"},
                })),
                WriteOpts::default(),
            )
            .unwrap();

        let state = current(&store, &room);
        assert!(!state.has_power_levels_event);
        assert_eq!(state.effective_power(&UserId::new_unchecked("@a:x")), 100);
        assert_eq!(state.effective_power(&UserId::new_unchecked("@b:x")), 0);
    }
}
