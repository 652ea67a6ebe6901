//! Implements `construct_federation::ResourceHandlers` against a
//! [`Homeserver`]: the HTTP surface of §4.9/§6, each endpoint translated
//! into a store read, an `admit_federated` call, or a signed self-response.

use std::collections::HashSet;

use construct_event::Event;
use construct_federation::{FedError, ResourceHandlers};
use construct_store::room;
use construct_types::{Depth, EventId, RoomId, Timestamp, UserId};
use serde_json::{json, Value};

use crate::auth_state;
use crate::homeserver::Homeserver;

fn parse_room_id(s: &str) -> Result<RoomId, FedError> {
    RoomId::parse(s).map_err(|_| FedError::Protocol(format!("malformed room id {s}")))
}

fn parse_event_id(s: &str) -> Result<EventId, FedError> {
    EventId::parse(s).map_err(|_| FedError::Protocol(format!("malformed event id {s}")))
}

fn pdu(event: &Event) -> Value {
    event.value().clone()
}

#[async_trait::async_trait]
impl ResourceHandlers for Homeserver {
    async fn version(&self) -> Result<Value, FedError> {
        Ok(json!({
            "server": {
                "name": "construct",
                "version": env!("CARGO_PKG_VERSION"),
            },
        }))
    }

    async fn key_server(&self, _keyid: String) -> Result<Value, FedError> {
        Ok(self.signed_key_response())
    }

    async fn key_query(&self, body: Value) -> Result<Value, FedError> {
        let requested_self = body
            .get("server_keys")
            .and_then(Value::as_object)
            .is_some_and(|hosts| hosts.contains_key(self.server_name()));
        if !requested_self {
            return Ok(json!({ "server_keys": [] }));
        }
        Ok(json!({ "server_keys": [self.signed_key_response()] }))
    }

    async fn send(&self, _txn_id: String, _origin: Option<String>, body: Value) -> Result<Value, FedError> {
        let pdus = body.get("pdus").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut results = serde_json::Map::new();
        for raw in pdus {
            let event = Event::from_value(raw.clone());
            let Some(room_id) = event.room_id() else {
                continue;
            };
            let Some(event_id) = event.event_id() else {
                continue;
            };
            let outcome = match self.admit_federated(&room_id, raw).await {
                Ok(_) => json!({}),
                Err(err) => json!({ "error": err.to_string() }),
            };
            results.insert(event_id.as_str().to_owned(), outcome);
        }
        Ok(json!({ "pdus": Value::Object(results) }))
    }

    async fn event(&self, event_id: String) -> Result<Value, FedError> {
        let id = parse_event_id(&event_id)?;
        let event = self
            .store()
            .fetch_by_id(&id)
            .ok_or_else(|| FedError::NotFound(event_id.clone()))?;
        Ok(json!({
            "origin": self.server_name(),
            "origin_server_ts": Timestamp::now().as_millis(),
            "pdus": [pdu(&event)],
        }))
    }

    async fn event_auth(&self, room_id: String, event_id: String) -> Result<Value, FedError> {
        let _room_id = parse_room_id(&room_id)?;
        let id = parse_event_id(&event_id)?;
        let event = self.store().fetch_by_id(&id).ok_or_else(|| FedError::NotFound(event_id))?;
        let chain = self.resolve_auth_chain(&event);
        Ok(json!({ "auth_chain": chain.iter().map(pdu).collect::<Vec<_>>() }))
    }

    async fn state(&self, room_id: String, _event_id: Option<String>) -> Result<Value, FedError> {
        let room_id = parse_room_id(&room_id)?;
        let state = room::state(self.store(), &room_id);
        let auth_chain: Vec<Event> = state.iter().flat_map(|e| self.resolve_auth_chain(e)).collect();
        Ok(json!({
            "pdus": state.iter().map(pdu).collect::<Vec<_>>(),
            "auth_chain": auth_chain.iter().map(pdu).collect::<Vec<_>>(),
        }))
    }

    async fn state_ids(&self, room_id: String, _event_id: Option<String>) -> Result<Value, FedError> {
        let room_id = parse_room_id(&room_id)?;
        let state = room::state(self.store(), &room_id);
        let auth_chain: Vec<Event> = state.iter().flat_map(|e| self.resolve_auth_chain(e)).collect();
        Ok(json!({
            "pdu_ids": state.iter().filter_map(|e| e.event_id()).map(|id| id.as_str().to_owned()).collect::<Vec<_>>(),
            "auth_chain_ids": auth_chain.iter().filter_map(|e| e.event_id()).map(|id| id.as_str().to_owned()).collect::<Vec<_>>(),
        }))
    }

    async fn backfill(&self, room_id: String, limit: u32, _v: Vec<String>) -> Result<Value, FedError> {
        let room_id = parse_room_id(&room_id)?;
        let mut events = room::events(self.store(), &room_id, Depth::new(i64::MIN), Depth::new(i64::MAX));
        events.sort_by_key(|e| std::cmp::Reverse(e.depth().get()));
        events.truncate(limit as usize);
        Ok(json!({
            "origin": self.server_name(),
            "origin_server_ts": Timestamp::now().as_millis(),
            "pdus": events.iter().map(pdu).collect::<Vec<_>>(),
        }))
    }

    async fn make_join(&self, room_id: String, user_id: String) -> Result<Value, FedError> {
        let room_id = parse_room_id(&room_id)?;
        let user_id = UserId::parse(&user_id).map_err(|_| FedError::Protocol("malformed user id".into()))?;
        let state = auth_state::current(self.store(), &room_id);
        if !state.has_create {
            return Err(FedError::NotFound(format!("{} not known here", room_id.as_str())));
        }
        Ok(json!({
            "event": self.make_join_template(&room_id, &user_id),
            "room_version": "construct1",
        }))
    }

    async fn send_join(&self, room_id: String, _event_id: String, body: Value) -> Result<Value, FedError> {
        let room_id = parse_room_id(&room_id)?;
        self.admit_federated(&room_id, body).await.map_err(FedError::from)?;
        let state = room::state(self.store(), &room_id);
        let auth_chain: Vec<Event> = state.iter().flat_map(|e| self.resolve_auth_chain(e)).collect();
        Ok(json!({
            "state": state.iter().map(pdu).collect::<Vec<_>>(),
            "auth_chain": auth_chain.iter().map(pdu).collect::<Vec<_>>(),
        }))
    }

    async fn invite(&self, room_id: String, _event_id: String, body: Value) -> Result<Value, FedError> {
        let room_id = parse_room_id(&room_id)?;
        let event = body.get("event").cloned().unwrap_or(body);
        self.admit_federated(&room_id, event.clone()).await.map_err(FedError::from)?;
        Ok(json!({ "event": event }))
    }

    async fn query_directory(&self, _room_alias: Option<String>) -> Result<Value, FedError> {
        Err(FedError::NotFound("room aliasing is not modeled".into()))
    }

    async fn query_profile(&self, _user_id: Option<String>) -> Result<Value, FedError> {
        Err(FedError::NotFound("user profiles are not modeled".into()))
    }

    async fn user_devices(&self, user_id: String) -> Result<Value, FedError> {
        Err(FedError::NotFound(format!("device lists are not modeled for {user_id}")))
    }

    async fn public_rooms(&self) -> Result<Value, FedError> {
        let chunk: Vec<Value> = self
            .store()
            .room_ids()
            .into_iter()
            .filter_map(|room_id| {
                let state = auth_state::current(self.store(), &room_id);
                if !state.has_create || state.join_rule != "public" {
                    return None;
                }
                let joined = state.members.values().filter(|m| m.as_str() == "join").count();
                Some(json!({
                    "room_id": room_id.as_str(),
                    "num_joined_members": joined,
                    "world_readable": false,
                    "guest_can_join": false,
                }))
            })
            .collect();
        let total = chunk.len();
        Ok(json!({ "chunk": chunk, "total_room_count_estimate": total }))
    }
}

impl Homeserver {
    fn signed_key_response(&self) -> Value {
        let valid_until = Timestamp::from_millis(Timestamp::now().as_millis() + 7 * 24 * 3600 * 1000);
        let server_name = self.server_name().to_owned();
        let keyid = self.signing_key().keyid().to_owned();
        let mut verify_keys = serde_json::Map::new();
        verify_keys.insert(keyid.clone(), json!({ "key": self.signing_key().public_key_base64() }));

        let mut value = json!({
            "server_name": server_name,
            "verify_keys": Value::Object(verify_keys),
            "old_verify_keys": {},
            "valid_until_ts": valid_until.as_millis(),
        });
        let canon = construct_crypto::canonicalize(&value);
        let signature = self.signing_key().sign(canon.as_bytes());

        let mut by_keyid = serde_json::Map::new();
        by_keyid.insert(keyid, json!(signature));
        let mut by_host = serde_json::Map::new();
        by_host.insert(server_name, Value::Object(by_keyid));
        value["signatures"] = Value::Object(by_host);
        value
    }

    /// Follows `auth_events` transitively from `event`, deduplicated,
    /// capped to avoid a pathological cycle spinning forever.
    fn resolve_auth_chain(&self, event: &Event) -> Vec<Event> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut frontier: Vec<EventId> = event.auth_events().into_iter().map(|r| r.event_id).collect();

        while let Some(id) = frontier.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(found) = self.store().fetch_by_id(&id) {
                frontier.extend(found.auth_events().into_iter().map(|r| r.event_id));
                chain.push(found);
            }
            if chain.len() > 1000 {
                break;
            }
        }
        chain
    }
}
