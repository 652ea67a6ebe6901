//! Authorization rules (§4.7 phase AUTH).
//!
//! Pure functions over a [`RoomAuthState`] snapshot the caller assembles
//! from the room's current state tree before invoking the VM; the kernel
//! itself never reads the tree directly, so these rules are trivial to
//! unit test against a hand-built state.

use std::collections::HashMap;

use construct_event::Event;
use construct_types::UserId;

use crate::error::AuthError;

#[derive(Debug, Clone)]
pub struct PowerLevels {
    pub users: HashMap<UserId, i64>,
    pub users_default: i64,
    pub events: HashMap<String, i64>,
    pub events_default: i64,
    pub state_default: i64,
    pub invite: i64,
    pub kick: i64,
    pub ban: i64,
    pub redact: i64,
}

impl Default for PowerLevels {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            users_default: 0,
            events: HashMap::new(),
            events_default: 0,
            state_default: 50,
            invite: 0,
            kick: 50,
            ban: 50,
            redact: 50,
        }
    }
}

impl PowerLevels {
    pub fn power_of(&self, user: &UserId) -> i64 {
        self.users.get(user).copied().unwrap_or(self.users_default)
    }

    fn required_for(&self, event_type: &str, is_state: bool) -> i64 {
        self.events.get(event_type).copied().unwrap_or(if is_state {
            self.state_default
        } else {
            self.events_default
        })
    }
}

/// A room's authorization-relevant state at the point a new event is being
/// evaluated, assembled by the caller from the state tree (§4.5/§4.7).
#[derive(Debug, Clone, Default)]
pub struct RoomAuthState {
    pub has_create: bool,
    /// The `m.room.create` event's sender, who holds implicit power 100
    /// until the room's first `m.room.power_levels` event is committed.
    pub creator: Option<UserId>,
    pub has_power_levels_event: bool,
    pub join_rule: String,
    pub power_levels: PowerLevels,
    /// Current membership per user: one of `join`, `invite`, `leave`, `ban`.
    pub members: HashMap<UserId, String>,
}

impl RoomAuthState {
    pub fn membership_of(&self, user: &UserId) -> &str {
        self.members.get(user).map_or("leave", String::as_str)
    }

    /// A user's power level, granting the creator implicit power 100 until
    /// the room has a real `m.room.power_levels` event to defer to.
    pub fn effective_power(&self, user: &UserId) -> i64 {
        if !self.has_power_levels_event && self.creator.as_ref() == Some(user) {
            100
        } else {
            self.power_levels.power_of(user)
        }
    }
}

fn check_membership(event: &Event, state: &RoomAuthState, sender: &UserId) -> Result<(), AuthError> {
    let Some(target_key) = event.state_key() else {
        return Err(AuthError::InvalidMembership);
    };
    let target = UserId::new_unchecked(target_key);
    let new_membership = event.membership().ok_or(AuthError::InvalidMembership)?;
    let current = state.membership_of(&target).to_owned();
    let sender_membership = state.membership_of(sender);
    let sender_power = state.effective_power(sender);

    match new_membership {
        "join" => {
            if sender != &target {
                return Err(AuthError::MissingAuthEvent);
            }
            let allowed = state.join_rule == "public" || current == "invite";
            if !allowed {
                return Err(AuthError::MissingAuthEvent);
            }
            Ok(())
        }
        "invite" => {
            if sender_membership != "join" {
                return Err(AuthError::SenderNotInRoom(sender.to_string()));
            }
            if current == "ban" {
                return Err(AuthError::MissingAuthEvent);
            }
            if sender_power < state.power_levels.invite {
                return Err(AuthError::InsufficientPowerLevel(
                    sender.to_string(),
                    sender_power,
                    state.power_levels.invite,
                    "invite",
                ));
            }
            Ok(())
        }
        "leave" => {
            if sender == &target {
                return Ok(());
            }
            if sender_membership != "join" {
                return Err(AuthError::SenderNotInRoom(sender.to_string()));
            }
            if sender_power < state.power_levels.kick {
                return Err(AuthError::InsufficientPowerLevel(
                    sender.to_string(),
                    sender_power,
                    state.power_levels.kick,
                    "kick",
                ));
            }
            Ok(())
        }
        "ban" => {
            if sender_membership != "join" {
                return Err(AuthError::SenderNotInRoom(sender.to_string()));
            }
            if sender_power < state.power_levels.ban {
                return Err(AuthError::InsufficientPowerLevel(
                    sender.to_string(),
                    sender_power,
                    state.power_levels.ban,
                    "ban",
                ));
            }
            Ok(())
        }
        _ => Err(AuthError::InvalidMembership),
    }
}

/// Checks `event` against `state`. The room's `m.room.create` is always
/// authorized as long as it's the first event the room has seen.
pub fn check_auth(event: &Event, state: &RoomAuthState) -> Result<(), AuthError> {
    if event.event_type() == "m.room.create" {
        return if state.has_create {
            Err(AuthError::DuplicateCreate)
        } else {
            Ok(())
        };
    }
    if !state.has_create {
        return Err(AuthError::NoCreateEvent);
    }

    let sender = event.sender().ok_or(AuthError::MissingAuthEvent)?;

    if event.event_type() == "m.room.member" {
        return check_membership(event, state, &sender);
    }

    if state.membership_of(&sender) != "join" {
        return Err(AuthError::SenderNotInRoom(sender.to_string()));
    }

    let required = state
        .power_levels
        .required_for(event.event_type(), event.is_state());
    let sender_power = state.effective_power(&sender);
    if sender_power < required {
        return Err(AuthError::InsufficientPowerLevel(
            sender.to_string(),
            sender_power,
            required,
            "send",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(user: &str, membership: &str) -> (UserId, String) {
        (UserId::new_unchecked(user), membership.to_owned())
    }

    #[test]
    fn create_event_is_authorized_exactly_once() {
        let create = Event::from_value(json!({"type": "m.room.create", "sender": "@a:x"}));
        let fresh = RoomAuthState::default();
        assert!(check_auth(&create, &fresh).is_ok());

        let mut existing = RoomAuthState::default();
        existing.has_create = true;
        assert!(matches!(check_auth(&create, &existing), Err(AuthError::DuplicateCreate)));
    }

    #[test]
    fn self_join_requires_public_room_or_invite() {
        let mut state = RoomAuthState {
            has_create: true,
            join_rule: "invite".into(),
            ..Default::default()
        };
        let join = Event::from_value(json!({
            "type": "m.room.member", "sender": "@a:x", "state_key": "@a:x",
            "content": {"membership": "join"},
        }));
        assert!(check_auth(&join, &state).is_err());

        state.members.extend([member("@a:x", "invite")]);
        assert!(check_auth(&join, &state).is_ok());
    }

    #[test]
    fn public_room_allows_self_join_without_invite() {
        let state = RoomAuthState {
            has_create: true,
            join_rule: "public".into(),
            ..Default::default()
        };
        let join = Event::from_value(json!({
            "type": "m.room.member", "sender": "@a:x", "state_key": "@a:x",
            "content": {"membership": "join"},
        }));
        assert!(check_auth(&join, &state).is_ok());
    }

    #[test]
    fn message_requires_sender_to_be_joined() {
        let state = RoomAuthState {
            has_create: true,
            ..Default::default()
        };
        let msg = Event::from_value(json!({"type": "m.room.message", "sender": "@a:x"}));
        assert!(matches!(check_auth(&msg, &state), Err(AuthError::SenderNotInRoom(_))));
    }

    #[test]
    fn message_from_joined_sender_with_enough_power_succeeds() {
        let state = RoomAuthState {
            has_create: true,
            members: [member("@a:x", "join")].into_iter().collect(),
            ..Default::default()
        };
        let msg = Event::from_value(json!({"type": "m.room.message", "sender": "@a:x"}));
        assert!(check_auth(&msg, &state).is_ok());
    }

    #[test]
    fn kick_requires_kick_level() {
        let mut pl = PowerLevels::default();
        pl.users.insert(UserId::new_unchecked("@mod:x"), 50);
        let state = RoomAuthState {
            has_create: true,
            members: [member("@mod:x", "join"), member("@a:x", "join")].into_iter().collect(),
            power_levels: pl,
            ..Default::default()
        };
        let kick = Event::from_value(json!({
            "type": "m.room.member", "sender": "@mod:x", "state_key": "@a:x",
            "content": {"membership": "leave"},
        }));
        assert!(check_auth(&kick, &state).is_ok());

        let state_no_power = RoomAuthState {
            has_create: true,
            members: [member("@plain:x", "join"), member("@a:x", "join")].into_iter().collect(),
            ..Default::default()
        };
        let kick2 = Event::from_value(json!({
            "type": "m.room.member", "sender": "@plain:x", "state_key": "@a:x",
            "content": {"membership": "leave"},
        }));
        assert!(matches!(
            check_auth(&kick2, &state_no_power),
            Err(AuthError::InsufficientPowerLevel(..))
        ));
    }

    #[test]
    fn state_change_requires_state_default_power_level() {
        let state = RoomAuthState {
            has_create: true,
            members: [member("@a:x", "join")].into_iter().collect(),
            ..Default::default()
        };
        let topic = Event::from_value(json!({
            "type": "m.room.topic", "sender": "@a:x", "state_key": "",
            "content": {"topic": "hi"},
        }));
        assert!(matches!(check_auth(&topic, &state), Err(AuthError::InsufficientPowerLevel(..))));
    }
}
