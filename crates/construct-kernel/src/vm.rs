//! The event evaluation VM (§4.7):
//! CONFORM → DUP → ACCESS → HASH → SIGN → VERIFY → AUTH → WRITE → FANOUT.
//!
//! [`evaluate`] is the pure core: given an event and everything the later
//! phases need (a dedup check, a room auth snapshot, and either a local
//! signing key or a federation key lookup), it returns the event as it
//! should be persisted plus the effects a caller must apply. It never
//! touches a store, so it's exercised directly by unit tests below.
//! [`EventVm`] is the thin shell that actually applies effects to a live
//! [`construct_store::EventStore`]; `Fanout` effects are hand back to the
//! caller since the kernel has no network access of its own.

use construct_crypto::ServerSigningKey;
use construct_event::{conform, derive, Event};
use construct_state::StateKey;
use construct_store::{EventStore, WriteOpts};
use construct_types::{EventId, RoomId};

use crate::auth::{check_auth, RoomAuthState};
use crate::effects::Effect;
use crate::error::KernelError;

/// How HASH/SIGN/VERIFY should treat this event: minted here, or arrived
/// over federation and needing its existing hash and signature checked.
pub enum Origin<'a> {
    Local {
        signing_key: &'a ServerSigningKey,
        local_host: &'a str,
    },
    Federation {
        /// Resolves `(host, keyid) -> base64 public key`; `None` if unknown.
        key_lookup: &'a dyn Fn(&str, &str) -> Option<String>,
    },
}

pub struct EvalInput<'a> {
    pub already_seen: bool,
    pub auth_state: &'a RoomAuthState,
    pub origin: Origin<'a>,
    pub conform_opts: &'a conform::ConformOpts,
}

/// The excuse set a caller minting a brand-new local event must pass as
/// `conform_opts`: CONFORM runs before HASH/SIGN even on the local path
/// (§4.7), so a freshly-authored event has no `event_id` or `signatures`
/// yet and would otherwise fail conformance before ever reaching the
/// phase that fills them in.
pub fn local_submission_opts() -> conform::ConformOpts {
    use construct_types::ConformFlag::*;
    conform::ConformOpts::excusing([InvalidOrMissingEventId, MissingSignatures, MissingOriginSignature])
}

/// Runs every phase in order, short-circuiting on the first failure.
pub fn evaluate(mut event: Event, input: &EvalInput<'_>) -> Result<(Event, Vec<Effect>), KernelError> {
    conform::check(&event, input.conform_opts).map_err(KernelError::Conform)?;

    if input.already_seen {
        let id = event.event_id().unwrap_or_else(|| EventId::new_unchecked(""));
        return Err(KernelError::AlreadySeen(id));
    }

    match &input.origin {
        Origin::Local { signing_key, local_host } => {
            let hash = derive::compute_event_hash(&event)?;
            event.set_hashes(&[("sha256".to_owned(), hash)].into_iter().collect());
            let event_id = derive::derive_event_id(&event, local_host);
            event.set_event_id(&event_id);
            derive::sign_event(&mut event, signing_key, local_host)?;
        }
        Origin::Federation { key_lookup } => {
            let event_id = event.event_id().ok_or_else(|| KernelError::BadHash(EventId::new_unchecked("")))?;
            if !derive::verify_event_hash(&event) {
                return Err(KernelError::BadHash(event_id));
            }
            let origin_host = event
                .origin()
                .ok_or_else(|| KernelError::BadSignature(event_id.clone()))?;
            let by_host = event
                .signatures()
                .get(origin_host.as_str())
                .cloned()
                .ok_or_else(|| KernelError::BadSignature(event_id.clone()))?;
            let verified = by_host.keys().any(|keyid| {
                key_lookup(origin_host.as_str(), keyid).is_some_and(|pubkey| {
                    derive::verify_event_signature(&event, origin_host.as_str(), keyid, &pubkey).is_ok()
                })
            });
            if !verified {
                return Err(KernelError::BadSignature(event_id));
            }
        }
    }

    check_auth(&event, input.auth_state)?;

    let event_id = event.event_id().expect("set during HASH or present on a federation event");
    let room_id = event.room_id();
    let except = match &input.origin {
        Origin::Federation { .. } => event.origin(),
        Origin::Local { .. } => None,
    };

    let mut effects = Vec::with_capacity(3);
    effects.push(Effect::Persist(event.clone()));
    if let (Some(room_id), Some(state_key)) = (&room_id, event.state_key()) {
        effects.push(Effect::UpdateState {
            room_id: room_id.clone(),
            key: StateKey::new(event.event_type(), state_key),
            event_id: event_id.clone(),
        });
    }
    if let Some(room_id) = room_id {
        effects.push(Effect::Fanout {
            room_id,
            event_id,
            except,
        });
    }

    Ok((event, effects))
}

/// Applies [`Effect`]s produced by [`evaluate`] against a live store.
/// `Fanout` effects are returned rather than executed: the kernel has no
/// network access, so it's the caller's job to push them to
/// `construct-federation`.
pub struct EventVm<'a> {
    store: &'a EventStore,
}

impl<'a> EventVm<'a> {
    pub fn new(store: &'a EventStore) -> Self {
        Self { store }
    }

    pub fn apply(&self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut fanouts = Vec::new();
        let mut state_updates: Vec<(RoomId, StateKey, EventId)> = Vec::new();

        for effect in effects {
            match effect {
                Effect::Persist(event) => {
                    if let Err(err) = self.store.write(&event, WriteOpts::default()) {
                        tracing::warn!(%err, "failed to persist event");
                    }
                }
                Effect::UpdateState { room_id, key, event_id } => {
                    state_updates.push((room_id, key, event_id));
                }
                Effect::MarkBad { event_id } => self.store.mark_bad(event_id),
                fanout @ Effect::Fanout { .. } => fanouts.push(fanout),
            }
        }

        for (room_id, key, event_id) in state_updates {
            let mut batch = construct_state::WriteBatch::new();
            let root = self
                .store
                .state_root(&room_id)
                .unwrap_or_else(|| construct_state::EMPTY_ROOT.to_owned());
            let new_root = construct_state::insert(self.store, &mut batch, &root, key, event_id);
            self.store.commit_state_batch(batch);
            self.store.set_state_root(room_id, new_root);
        }

        fanouts
    }
}
