//! Wires the kernel, store, and federation client into the operations a
//! resource handler or CLI command actually calls (§4.7, §6).
//!
//! Every method here follows the same shape: build a proto-event, assemble
//! the room's [`auth_state::current`] snapshot, hand both to
//! `construct_kernel::evaluate`, apply the resulting effects against the
//! store, and return the `Fanout` effects for the caller to push over
//! federation. The kernel itself never touches the store or the network;
//! this is the one place that closes the loop.

use std::sync::Arc;

use construct_config::ConstructConfig;
use construct_crypto::ServerSigningKey;
use construct_event::Event;
use construct_federation::{FedError, FederationClient};
use construct_kernel::{evaluate, local_submission_opts, EvalInput, Effect, EventVm, KernelError, Origin};
use construct_runtime::Reactor;
use construct_store::EventStore;
use construct_types::{Depth, EventId, RoomId, Timestamp, UserId};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::auth_state;
use crate::error::{HomeserverError, Result};
use crate::keys;

/// One worker per shard of the room keyspace, draining its own bounded
/// inbox (§5, §7 "Cooperative runtime"). Chosen to outrun a handful of busy
/// rooms without a worker per core; not config, since nothing about it is
/// deployment-specific yet.
const REACTOR_WORKERS: usize = 8;
const REACTOR_QUEUE_CAPACITY: usize = 256;

/// A federated PDU routed to its room's reactor worker, carrying the channel
/// the submitting request is waiting on for the result.
struct FederatedAdmit {
    room_id: RoomId,
    value: Value,
    respond: oneshot::Sender<Result<Vec<Effect>>>,
}

/// The actual CONFORM-through-WRITE pipeline for one federated PDU (§4.7),
/// run on whichever reactor worker `room_id` hashes to. `key_lookup` in
/// [`EvalInput`] is a synchronous callback, so every `(host, keyid)` the
/// event actually claims a signature under is resolved up front over the
/// (async) server-key client, then handed to `evaluate` as a plain map
/// lookup.
async fn evaluate_federated(
    store: &EventStore,
    federation: &FederationClient,
    room_id: &RoomId,
    value: Value,
) -> Result<Vec<Effect>> {
    let event = Event::from_value(value);
    let already_seen = event.event_id().is_some_and(|id| store.fetch_by_id(&id).is_some());
    let auth_state = auth_state::current(store, room_id);

    let mut resolved = std::collections::HashMap::new();
    if let Some(origin) = event.origin() {
        let host = origin.as_str().to_owned();
        if let Some(keyids) = event.signatures().get(&host) {
            for keyid in keyids.keys() {
                if let Ok(pubkey) = federation.keys.key_for(&host, keyid, None, Timestamp::now()).await {
                    resolved.insert((host.clone(), keyid.clone()), pubkey);
                }
            }
        }
    }
    let key_lookup = |host: &str, keyid: &str| resolved.get(&(host.to_owned(), keyid.to_owned())).cloned();

    let opts = construct_event::conform::ConformOpts::none();
    let input = EvalInput {
        already_seen,
        auth_state: &auth_state,
        origin: Origin::Federation { key_lookup: &key_lookup },
        conform_opts: &opts,
    };

    match evaluate(event, &input) {
        Ok((_, effects)) => {
            let vm = EventVm::new(store);
            Ok(vm.apply(effects))
        }
        Err(err @ (KernelError::BadHash(_) | KernelError::BadSignature(_))) => {
            let bad_id = match &err {
                KernelError::BadHash(id) | KernelError::BadSignature(id) => id.clone(),
                _ => unreachable!(),
            };
            store.mark_bad(bad_id);
            Err(HomeserverError::Kernel(err))
        }
        Err(err) => Err(HomeserverError::Kernel(err)),
    }
}

/// Owns the store, the local signing identity, and the outbound federation
/// client. Local to one `server_name`.
pub struct Homeserver {
    store: Arc<EventStore>,
    signing_key: Arc<ServerSigningKey>,
    server_name: String,
    federation: Arc<FederationClient>,
    /// Spawned lazily, on first federated admission, so that constructing a
    /// `Homeserver` (including in plain `#[test]` functions with no Tokio
    /// runtime around them) never needs one; only `admit_federated`, already
    /// async, does.
    reactor: tokio::sync::OnceCell<Reactor<FederatedAdmit>>,
}

impl Homeserver {
    /// Opens the event log under `config.server.data_dir`, loading or
    /// generating the signing key at `config.server.signing_key_path`.
    pub fn open(config: &ConstructConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.server.data_dir)?;
        let store = EventStore::open(&config.server.data_dir.join("events.log"))?;
        let signing_key = keys::load_or_generate(&config.server.signing_key_path)?;

        let federation_key = ServerSigningKey::from_seed(signing_key.keyid(), &signing_key.seed());
        let federation = FederationClient::new(federation_key, config.server.server_name.clone())
            .map_err(HomeserverError::Federation)?;

        Ok(Self::assemble(store, signing_key, config.server.server_name.clone(), federation))
    }

    /// Builds an ephemeral homeserver over an in-memory store, for tests
    /// and the `construct --ephemeral` CLI mode.
    pub fn ephemeral(server_name: impl Into<String>) -> Result<Self> {
        let server_name = server_name.into();
        let signing_key = ServerSigningKey::generate("ed25519:1");
        let federation_key = ServerSigningKey::from_seed(signing_key.keyid(), &signing_key.seed());
        let federation =
            FederationClient::new(federation_key, server_name.clone()).map_err(HomeserverError::Federation)?;
        Ok(Self::assemble(EventStore::in_memory(), signing_key, server_name, federation))
    }

    /// Common tail of both constructors: just wraps the three shared
    /// resources in `Arc` so the reactor workers spawned on first federated
    /// admission can cheaply clone them (§4.1, §5).
    fn assemble(store: EventStore, signing_key: ServerSigningKey, server_name: String, federation: FederationClient) -> Self {
        Self {
            store: Arc::new(store),
            signing_key: Arc::new(signing_key),
            server_name,
            federation: Arc::new(federation),
            reactor: tokio::sync::OnceCell::new(),
        }
    }

    /// Routes every federated admission through one worker per room-hash
    /// shard, so admissions into the same room run one at a time, in
    /// submission order, no matter how many `axum` handler tasks are
    /// concurrently POSTing to it (§4.1, §5, §7 "Cooperative runtime").
    /// Spawned on first use rather than in the constructor, which keeps
    /// `Homeserver::open`/`ephemeral` usable outside a Tokio runtime.
    async fn reactor(&self) -> &Reactor<FederatedAdmit> {
        self.reactor
            .get_or_init(|| async {
                let store = self.store.clone();
                let federation = self.federation.clone();
                Reactor::spawn(REACTOR_WORKERS, REACTOR_QUEUE_CAPACITY, move |req: FederatedAdmit| {
                    let store = store.clone();
                    let federation = federation.clone();
                    async move {
                        let result = evaluate_federated(&store, &federation, &req.room_id, req.value).await;
                        let _ = req.respond.send(result);
                    }
                })
            })
            .await
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn federation(&self) -> &FederationClient {
        &self.federation
    }

    pub fn signing_key(&self) -> &ServerSigningKey {
        &self.signing_key
    }

    /// Mints and commits `m.room.create`, the creator's own join,
    /// `m.room.power_levels`, and `m.room.join_rules`, as four separate
    /// events in the order a real homeserver's room-creation command
    /// produces them. Returns the new room id and any fanout effects
    /// (empty: a room with no other members has no origins to fan out to
    /// yet).
    pub fn create_room(&self, creator: &UserId) -> Result<(RoomId, Vec<Effect>)> {
        let room_id = self.mint_room_id();

        let create = json!({
            "room_id": room_id.as_str(),
            "sender": creator.as_str(),
            "origin": self.server_name,
            "type": "m.room.create",
            "state_key": "",
            "content": {"creator": creator.as_str()},
        });
        let (_, mut effects) = self.submit_local(&room_id, create)?;

        let join = json!({
            "room_id": room_id.as_str(),
            "sender": creator.as_str(),
            "origin": self.server_name,
            "type": "m.room.member",
            "state_key": creator.as_str(),
            "membership": "join",
            "content": {"membership": "join"},
        });
        let (_, join_effects) = self.submit_local(&room_id, join)?;
        effects.extend(join_effects);

        let mut creator_power = serde_json::Map::new();
        creator_power.insert(creator.as_str().to_owned(), json!(100));
        let power_levels = json!({
            "room_id": room_id.as_str(),
            "sender": creator.as_str(),
            "origin": self.server_name,
            "type": "m.room.power_levels",
            "state_key": "",
            "content": {"users": Value::Object(creator_power)},
        });
        let (_, pl_effects) = self.submit_local(&room_id, power_levels)?;
        effects.extend(pl_effects);

        let join_rules = json!({
            "room_id": room_id.as_str(),
            "sender": creator.as_str(),
            "origin": self.server_name,
            "type": "m.room.join_rules",
            "state_key": "",
            "content": {"join_rule": "invite"},
        });
        let (_, jr_effects) = self.submit_local(&room_id, join_rules)?;
        effects.extend(jr_effects);

        Ok((room_id, effects))
    }

    pub fn send_message(&self, room_id: &RoomId, sender: &UserId, content: Value) -> Result<(EventId, Vec<Effect>)> {
        let event = json!({
            "room_id": room_id.as_str(),
            "sender": sender.as_str(),
            "origin": self.server_name,
            "type": "m.room.message",
            "content": content,
        });
        self.submit_local(room_id, event)
    }

    pub fn invite(&self, room_id: &RoomId, sender: &UserId, target: &UserId) -> Result<(EventId, Vec<Effect>)> {
        let event = json!({
            "room_id": room_id.as_str(),
            "sender": sender.as_str(),
            "origin": self.server_name,
            "type": "m.room.member",
            "state_key": target.as_str(),
            "membership": "invite",
            "content": {"membership": "invite"},
        });
        self.submit_local(room_id, event)
    }

    pub fn join(&self, room_id: &RoomId, user: &UserId) -> Result<(EventId, Vec<Effect>)> {
        let event = json!({
            "room_id": room_id.as_str(),
            "sender": user.as_str(),
            "origin": self.server_name,
            "type": "m.room.member",
            "state_key": user.as_str(),
            "membership": "join",
            "content": {"membership": "join"},
        });
        self.submit_local(room_id, event)
    }

    /// Admits an event that has already been hashed, signed, and verified
    /// by a peer (a received transaction PDU, a `send_join`, an `invite`
    /// body): runs DUP/AUTH/WRITE/FANOUT with `Origin::Federation`.
    ///
    /// Routes to `room_id`'s reactor worker and waits for the result, so
    /// that every admission into the same room runs one at a time, in
    /// submission order, no matter how many `axum` handler tasks are
    /// concurrently POSTing to it. Rejects with [`FedError::Overload`] if
    /// that worker's inbox is full rather than piling up unbounded work
    /// behind a slow room.
    pub async fn admit_federated(&self, room_id: &RoomId, value: Value) -> Result<Vec<Effect>> {
        let (respond, recv) = oneshot::channel();
        let req = FederatedAdmit { room_id: room_id.clone(), value, respond };
        self.reactor()
            .await
            .submit(room_id, req)
            .map_err(|_| HomeserverError::Federation(FedError::Overload(format!("room {room_id} is backlogged"))))?;
        recv.await
            .map_err(|_| HomeserverError::Federation(FedError::Cancelled))?
    }

    /// Fills in `depth`, `prev_events`, `prev_state`, and `auth_events` from
    /// the room's current forward extremities and flattened state (§4.7
    /// ACCESS phase), in place.
    ///
    /// `prev_state`/`auth_events` both carry the room's full current state
    /// set: conformance (§4.4) requires a non-empty `prev_state` on every
    /// non-create state event with prev_events, and `event_auth`/`state`
    /// (§4.9) walk `auth_events` to answer auth-chain queries.
    pub(crate) fn stamp_depth_and_prev_events(&self, room_id: &RoomId, value: &mut Value) {
        let heads = self.store.heads(room_id);
        let depth = if heads.is_empty() {
            Depth::new(0)
        } else {
            let depths = heads.iter().filter_map(|id| self.store.fetch_by_id(id)).map(|e| e.depth());
            Depth::child_of(depths)
        };

        let state_refs: Vec<Value> = construct_store::room::state(&self.store, room_id)
            .iter()
            .filter_map(|e| e.event_id())
            .map(|id| json!([id.as_str(), {}]))
            .collect();

        if let Some(obj) = value.as_object_mut() {
            obj.insert("depth".to_owned(), json!(depth.get()));
            obj.insert(
                "prev_events".to_owned(),
                json!(heads.iter().map(|id| json!([id.as_str(), {}])).collect::<Vec<_>>()),
            );
            obj.insert("prev_state".to_owned(), json!(state_refs.clone()));
            obj.insert("auth_events".to_owned(), json!(state_refs));
            obj.entry("origin_server_ts".to_owned())
                .or_insert_with(|| json!(Timestamp::now().as_millis()));
        }
    }

    /// Builds the unsigned join-event template a remote server fills in a
    /// `make_join` response with, for the requesting server to sign and
    /// return via `send_join` (§4.9).
    pub fn make_join_template(&self, room_id: &RoomId, user_id: &UserId) -> Value {
        let mut value = json!({
            "room_id": room_id.as_str(),
            "sender": user_id.as_str(),
            "origin": self.server_name,
            "type": "m.room.member",
            "state_key": user_id.as_str(),
            "membership": "join",
            "content": {"membership": "join"},
        });
        self.stamp_depth_and_prev_events(room_id, &mut value);
        value
    }

    fn submit_local(&self, room_id: &RoomId, mut value: Value) -> Result<(EventId, Vec<Effect>)> {
        self.stamp_depth_and_prev_events(room_id, &mut value);

        let event = Event::from_value(value);
        let auth_state = auth_state::current(&self.store, room_id);
        let opts = local_submission_opts();
        let input = EvalInput {
            already_seen: false,
            auth_state: &auth_state,
            origin: Origin::Local {
                signing_key: &self.signing_key,
                local_host: &self.server_name,
            },
            conform_opts: &opts,
        };

        let (event, effects) = evaluate(event, &input).map_err(HomeserverError::Kernel)?;
        let event_id = event.event_id().expect("HASH phase always assigns an event_id");

        let vm = EventVm::new(&self.store);
        let fanouts = vm.apply(effects);
        Ok((event_id, fanouts))
    }

    /// `!<16 random bytes, base58>:<server_name>`.
    fn mint_room_id(&self) -> RoomId {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        RoomId::from_parts(&bs58::encode(bytes).into_string(), &self.server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_a_room_joins_the_creator() {
        let hs = Homeserver::ephemeral("hs.example").unwrap();
        let creator = UserId::new_unchecked("@alice:hs.example");
        let (room_id, _effects) = hs.create_room(&creator).unwrap();

        let state = auth_state::current(hs.store(), &room_id);
        assert!(state.has_create);
        assert_eq!(state.membership_of(&creator), "join");
    }

    #[test]
    fn sending_a_message_after_create_succeeds() {
        let hs = Homeserver::ephemeral("hs.example").unwrap();
        let creator = UserId::new_unchecked("@alice:hs.example");
        let (room_id, _) = hs.create_room(&creator).unwrap();

        let (event_id, _) = hs
            .send_message(&room_id, &creator, json!({"msgtype": "m.text", "body": "hi"}))
            .unwrap();
        assert!(hs.store().fetch_by_id(&event_id).is_some());
    }

    #[test]
    fn inviting_then_joining_updates_membership() {
        let hs = Homeserver::ephemeral("hs.example").unwrap();
        let alice = UserId::new_unchecked("@alice:hs.example");
        let bob = UserId::new_unchecked("@bob:hs.example");
        let (room_id, _) = hs.create_room(&alice).unwrap();

        hs.invite(&room_id, &alice, &bob).unwrap();
        assert_eq!(auth_state::current(hs.store(), &room_id).membership_of(&bob), "invite");

        hs.join(&room_id, &bob).unwrap();
        assert_eq!(auth_state::current(hs.store(), &room_id).membership_of(&bob), "join");
    }

    #[test]
    fn sending_a_message_with_no_create_is_rejected() {
        let hs = Homeserver::ephemeral("hs.example").unwrap();
        let room_id = RoomId::new_unchecked("!nope:hs.example");
        let sender = UserId::new_unchecked("@alice:hs.example");
        assert!(hs.send_message(&room_id, &sender, json!({"body": "hi"})).is_err());
    }

    /// Two malformed PDUs submitted concurrently into the same room both
    /// come back as errors: proves `admit_federated` actually runs its work
    /// through the reactor's worker (rather than some leftover inline path)
    /// and that routing both to the same room's single worker doesn't drop
    /// or hang either one. Neither carries a `signatures` object, so
    /// `evaluate_federated` never reaches its network key-lookup call and
    /// this stays fast; the rejection itself happens in CONFORM.
    #[tokio::test]
    async fn admit_federated_routes_both_concurrent_admissions_through_the_reactor() {
        let hs = Homeserver::ephemeral("hs.example").unwrap();
        let alice = UserId::new_unchecked("@alice:hs.example");
        let (room_id, _) = hs.create_room(&alice).unwrap();

        let pdu = |n: u32| {
            json!({
                "event_id": format!("$bogus{n}:peer.example"),
                "room_id": room_id.as_str(),
                "sender": alice.as_str(),
                "origin": "peer.example",
                "type": "m.room.message",
                "depth": 5,
                "prev_events": hs.store().heads(&room_id).iter().map(|id| json!([id.as_str(), {}])).collect::<Vec<_>>(),
                "content": {"msgtype": "m.text", "body": "hi"},
            })
        };

        let (a, b) = tokio::join!(hs.admit_federated(&room_id, pdu(1)), hs.admit_federated(&room_id, pdu(2)));
        assert!(a.is_err());
        assert!(b.is_err());
    }

    #[test]
    fn create_room_mints_exactly_the_four_bootstrap_events() {
        let hs = Homeserver::ephemeral("hs.example").unwrap();
        let alice = UserId::new_unchecked("@alice:hs.example");
        let (room_id, _) = hs.create_room(&alice).unwrap();

        let events = construct_store::room::events(hs.store(), &room_id, Depth::new(i64::MIN), Depth::new(i64::MAX));
        assert_eq!(events.len(), 4);

        let state = auth_state::current(hs.store(), &room_id);
        assert!(state.has_create);
        assert!(state.has_power_levels_event);
        assert_eq!(state.join_rule, "invite");

        let heads = hs.store().heads(&room_id);
        assert_eq!(heads.len(), 1);
        let head_depth = hs.store().fetch_by_id(&heads[0]).unwrap().depth();
        assert_eq!(head_depth.get(), 4);
    }
}
