//! Redaction's "essential" content reduction (§4.4).
//!
//! `essential(E)` narrows `content` to the type-specific subset that must
//! survive a redaction. It is the form signatures are computed and
//! verified over (`E''`), independent of whether the event was ever
//! actually redacted.

use serde_json::{Map, Value};

use crate::event::Event;

fn kept_content_keys(event_type: &str) -> &'static [&'static str] {
    match event_type {
        "m.room.create" => &["creator"],
        "m.room.member" => &["membership"],
        "m.room.join_rules" => &["join_rule"],
        "m.room.history_visibility" => &["history_visibility"],
        "m.room.aliases" => &["aliases"],
        "m.room.power_levels" => &[
            "ban",
            "events",
            "events_default",
            "kick",
            "redact",
            "state_default",
            "users",
            "users_default",
        ],
        _ => &[],
    }
}

/// Returns `event` with `content` reduced to its essential subset.
pub fn essential(event: &Event) -> Event {
    let keep = kept_content_keys(event.event_type());
    let content = event.content();
    let mut reduced = Map::new();
    for key in keep {
        if let Some(v) = content.get(*key) {
            reduced.insert((*key).to_string(), v.clone());
        }
    }
    let mut out = event.clone();
    out.set_content(Value::Object(reduced));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn power_levels_keeps_only_listed_members() {
        let e = Event::from_value(json!({
            "type": "m.room.power_levels",
            "content": {
                "ban": 50, "kick": 50, "redact": 50, "invite": 0,
                "events_default": 0, "state_default": 50,
                "events": {}, "users": {}, "users_default": 0,
                "historical": "junk",
            }
        }));
        let reduced = essential(&e);
        let content = reduced.content().as_object().unwrap();
        assert!(content.contains_key("ban"));
        assert!(!content.contains_key("invite"));
        assert!(!content.contains_key("historical"));
    }

    #[test]
    fn unknown_type_reduces_content_to_empty_object() {
        let e = Event::from_value(json!({"type": "m.room.message", "content": {"body": "hi"}}));
        let reduced = essential(&e);
        assert_eq!(reduced.content(), &json!({}));
    }

    #[test]
    fn essential_leaves_other_fields_untouched() {
        let e = Event::from_value(json!({
            "type": "m.room.create",
            "event_id": "$a:x",
            "content": {"creator": "@a:x"},
        }));
        let reduced = essential(&e);
        assert_eq!(reduced.event_id().unwrap().as_str(), "$a:x");
    }
}
