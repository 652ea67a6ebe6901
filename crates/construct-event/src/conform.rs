//! Conformance (§4.4): the closed bitset of structural failures an event
//! can exhibit before any hashing, signing or auth-rule work is attempted.

use std::collections::{HashMap, HashSet};

use construct_types::ConformFlag;

use crate::event::Event;

const VALID_MEMBERSHIPS: &[&str] = &["join", "leave", "invite", "ban", "knock"];

/// Excuses a specific set of flags from being treated as fatal.
///
/// Locally forged events may deliberately carry `MismatchOriginSender`
/// (e.g. an admin tool minting an event on a user's behalf); §4.7 phase 1
/// calls this `non_conform`.
#[derive(Debug, Clone, Default)]
pub struct ConformOpts {
    pub excuse: HashSet<ConformFlag>,
}

impl ConformOpts {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn excusing(flags: impl IntoIterator<Item = ConformFlag>) -> Self {
        Self {
            excuse: flags.into_iter().collect(),
        }
    }
}

/// Runs every conformance rule and returns every flag that fired, in a
/// deterministic (enum declaration) order, regardless of `opts`.
pub fn conform_flags(event: &Event) -> Vec<ConformFlag> {
    use ConformFlag::*;

    let mut flags = Vec::new();
    let mut push = |f: ConformFlag| {
        if !flags.contains(&f) {
            flags.push(f);
        }
    };

    let event_id = event.event_id();
    let room_id = event.room_id();
    let sender = event.sender();
    let origin = event.origin();
    let event_type = event.event_type();
    let is_create = event_type == "m.room.create";

    if event_id.is_none() {
        push(InvalidOrMissingEventId);
    }
    if room_id.is_none() {
        push(InvalidOrMissingRoomId);
    }
    if sender.is_none() {
        push(InvalidOrMissingSenderId);
    }
    if event_type.is_empty() {
        push(MissingType);
    }
    if origin.is_none() {
        push(MissingOrigin);
    }

    if let (Some(sender), Some(origin)) = (&sender, &origin) {
        if !sender.host_is(origin.as_str()) {
            push(MismatchOriginSender);
        }
    }
    if let (Some(event_id), Some(origin)) = (&event_id, &origin) {
        if !event_id.host_is(origin.as_str()) {
            push(MismatchOriginEventId);
        }
    }

    if event_type == "m.room.member" {
        let top = event.value().get("membership").and_then(|v| v.as_str());
        let content = event.content().get("membership").and_then(|v| v.as_str());
        match (top, content) {
            (None, None) => {
                push(MissingMembership);
                push(MissingContentMembership);
            }
            _ => {
                if let Some(m) = top {
                    if !VALID_MEMBERSHIPS.contains(&m) {
                        push(InvalidMembership);
                    }
                } else {
                    push(MissingMembership);
                }
                if let Some(m) = content {
                    if !VALID_MEMBERSHIPS.contains(&m) {
                        push(InvalidContentMembership);
                    }
                } else {
                    push(MissingContentMembership);
                }
            }
        }
    }

    if event_type == "m.room.redaction" {
        match event.redacts() {
            None => push(InvalidOrMissingRedactsId),
            Some(redacts) => {
                if Some(&redacts) == event_id.as_ref() {
                    push(SelfRedacts);
                }
            }
        }
    }

    let depth = event.depth_raw();
    if depth < 0 {
        push(DepthNegative);
    }
    if (depth == 0) != is_create {
        push(DepthZero);
    }

    let prev_events = event.prev_events();
    if !is_create && prev_events.is_empty() {
        push(MissingPrevEvents);
    }
    check_self_and_dup(&prev_events, event_id.as_ref(), &mut push, SelfPrevEvent, DupPrevEvent);

    let prev_state = event.prev_state();
    if event.is_state() && !is_create && !prev_events.is_empty() && prev_state.is_empty() {
        push(MissingPrevState);
    }
    check_self_and_dup(&prev_state, event_id.as_ref(), &mut push, SelfPrevState, DupPrevState);

    let signatures = event.signatures();
    if signatures.is_empty() {
        push(MissingSignatures);
    } else if let Some(origin) = &origin {
        if !signatures.contains_key(origin.as_str()) {
            push(MissingOriginSignature);
        }
    }

    flags
}

fn check_self_and_dup(
    refs: &[crate::event::PrevRef],
    self_id: Option<&construct_types::EventId>,
    push: &mut impl FnMut(ConformFlag),
    self_flag: ConformFlag,
    dup_flag: ConformFlag,
) {
    let mut seen = HashMap::new();
    for r in refs {
        if Some(&r.event_id) == self_id {
            push(self_flag);
        }
        let count = seen.entry(r.event_id.clone()).or_insert(0u32);
        *count += 1;
        if *count > 1 {
            push(dup_flag);
        }
    }
}

/// Flags from [`conform_flags`] that are not excused by `opts`.
pub fn fatal_flags(event: &Event, opts: &ConformOpts) -> Vec<ConformFlag> {
    conform_flags(event)
        .into_iter()
        .filter(|f| !opts.excuse.contains(f))
        .collect()
}

/// Runs conformance; `Ok(())` iff no non-excused flag fired.
pub fn check(event: &Event, opts: &ConformOpts) -> Result<(), Vec<ConformFlag>> {
    let fatal = fatal_flags(event, opts);
    if fatal.is_empty() { Ok(()) } else { Err(fatal) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_create() -> Event {
        Event::from_value(json!({
            "event_id": "$create:self",
            "room_id": "!r:self",
            "sender": "@alice:self",
            "origin": "self",
            "type": "m.room.create",
            "state_key": "",
            "depth": 0,
            "content": {"creator": "@alice:self"},
            "signatures": {"self": {"ed25519:1": "sig"}},
        }))
    }

    #[test]
    fn well_formed_create_event_conforms() {
        let e = base_create();
        assert!(conform_flags(&e).is_empty(), "{:?}", conform_flags(&e));
    }

    #[test]
    fn non_create_needs_prev_events() {
        let mut v = base_create().into_value();
        v["type"] = json!("m.room.message");
        v["depth"] = json!(1);
        let e = Event::from_value(v);
        assert!(conform_flags(&e).contains(&ConformFlag::MissingPrevEvents));
    }

    #[test]
    fn self_prev_event_is_flagged() {
        let mut v = base_create().into_value();
        v["type"] = json!("m.room.message");
        v["depth"] = json!(1);
        v["prev_events"] = json!([["$create:self", {}]]);
        let e = Event::from_value(v);
        assert!(conform_flags(&e).contains(&ConformFlag::SelfPrevEvent));
    }

    #[test]
    fn dup_prev_event_is_flagged() {
        let mut v = base_create().into_value();
        v["type"] = json!("m.room.message");
        v["depth"] = json!(1);
        v["prev_events"] = json!([["$a:self", {}], ["$a:self", {}]]);
        let e = Event::from_value(v);
        assert!(conform_flags(&e).contains(&ConformFlag::DupPrevEvent));
    }

    #[test]
    fn mismatch_origin_sender_can_be_excused() {
        let mut v = base_create().into_value();
        v["sender"] = json!("@alice:other");
        let e = Event::from_value(v);
        assert!(conform_flags(&e).contains(&ConformFlag::MismatchOriginSender));
        let opts = ConformOpts::excusing([ConformFlag::MismatchOriginSender]);
        assert!(check(&e, &opts).is_ok());
    }

    #[test]
    fn membership_event_requires_valid_membership() {
        let mut v = base_create().into_value();
        v["type"] = json!("m.room.member");
        v["depth"] = json!(1);
        v["prev_events"] = json!([["$create:self", {}]]);
        v["content"] = json!({"membership": "not-a-real-one"});
        v["membership"] = json!("not-a-real-one");
        let e = Event::from_value(v);
        let flags = conform_flags(&e);
        assert!(flags.contains(&ConformFlag::InvalidMembership));
        assert!(flags.contains(&ConformFlag::InvalidContentMembership));
    }

    #[test]
    fn depth_zero_mismatch_is_flagged_both_ways() {
        let mut v = base_create().into_value();
        v["type"] = json!("m.room.message");
        v["prev_events"] = json!([["$create:self", {}]]);
        // depth left at 0 on a non-create event
        let e = Event::from_value(v);
        assert!(conform_flags(&e).contains(&ConformFlag::DepthZero));
    }
}
