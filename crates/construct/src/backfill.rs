//! Ancestor backfill (§4.10): given an event a room's forward extremity
//! references that this server has never seen, recursively fetch the
//! missing chain from a peer and admit it deepest-first.
//!
//! Concurrent backfills of the same room can both stumble onto the same
//! missing ancestor; `construct_cache::KeyedCache` collapses those into a
//! single outbound `/event` fetch, same as it does for server-key lookups
//! in `construct-federation`.

use std::collections::HashSet;

use construct_cache::KeyedCache;
use construct_event::Event;
use construct_federation::{FedError, FederationClient};
use construct_types::{EventId, RoomId};
use serde_json::Value;

use crate::error::{HomeserverError, Result};
use crate::homeserver::Homeserver;

/// Fetches a single event by id from a peer. Implemented for
/// `FederationClient` for real use; a test can implement this directly over
/// an in-memory map to count fetches without a network.
#[async_trait::async_trait]
pub trait EventFetcher: Send + Sync {
    async fn fetch_event(&self, destination: &str, event_id: &str) -> std::result::Result<Value, FedError>;
}

#[async_trait::async_trait]
impl EventFetcher for FederationClient {
    async fn fetch_event(&self, destination: &str, event_id: &str) -> std::result::Result<Value, FedError> {
        let resp = self.event(destination, event_id).await?;
        resp.get("pdus")
            .and_then(Value::as_array)
            .and_then(|pdus| pdus.first())
            .cloned()
            .ok_or_else(|| FedError::Protocol(format!("empty /event response for {event_id}")))
    }
}

/// De-duplicates concurrent fetches of the same ancestor across every
/// backfill in flight against `source`.
pub struct AncestorFetcher<'a> {
    source: &'a dyn EventFetcher,
    cache: KeyedCache<EventId, Value, FedError>,
}

impl<'a> AncestorFetcher<'a> {
    pub fn new(source: &'a dyn EventFetcher) -> Self {
        Self { source, cache: KeyedCache::new(1024) }
    }

    async fn fetch(&self, destination: &str, event_id: &EventId) -> Result<Value> {
        self.cache
            .get_or_compute(event_id.clone(), || self.source.fetch_event(destination, event_id.as_str()))
            .await
            .map_err(|err| HomeserverError::Federation(FedError::Network(err.to_string())))
    }
}

impl Homeserver {
    /// Walks `event_id`'s `prev_events` back through `destination` until
    /// every ancestor this server is missing has been fetched, then admits
    /// the whole resolved chain deepest-first so each one's own
    /// `prev_events` are already in the store by the time it's evaluated.
    pub async fn backfill_ancestors(
        &self,
        fetcher: &AncestorFetcher<'_>,
        destination: &str,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> Result<usize> {
        let mut frontier = vec![event_id.clone()];
        let mut seen = HashSet::new();
        let mut resolved: Vec<Value> = Vec::new();

        while let Some(id) = frontier.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if self.store().fetch_by_id(&id).is_some() {
                continue;
            }
            let pdu = fetcher.fetch(destination, &id).await?;
            let event = Event::from_value(pdu.clone());
            for prev in event.prev_events() {
                if self.store().fetch_by_id(&prev.event_id).is_none() {
                    frontier.push(prev.event_id);
                }
            }
            resolved.push(pdu);
        }

        resolved.sort_by_key(|pdu| pdu.get("depth").and_then(Value::as_i64).unwrap_or(0));
        let count = resolved.len();
        for pdu in resolved {
            self.admit_federated(room_id, pdu).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use construct_types::UserId;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[tokio::test]
    async fn backfilling_a_locally_known_chain_is_a_no_op() {
        let hs = Homeserver::ephemeral("hs.example").unwrap();
        let alice = UserId::new_unchecked("@alice:hs.example");
        let (room_id, _) = hs.create_room(&alice).unwrap();
        let heads = hs.store().heads(&room_id);
        let head_id = heads[0].clone();

        struct NeverCalled;
        #[async_trait::async_trait]
        impl EventFetcher for NeverCalled {
            async fn fetch_event(&self, _destination: &str, event_id: &str) -> std::result::Result<Value, FedError> {
                panic!("fetch_event should not run for {event_id}, it's already local");
            }
        }
        let fetcher = AncestorFetcher::new(&NeverCalled);
        let fetched = hs.backfill_ancestors(&fetcher, "peer.example", &room_id, &head_id).await.unwrap();
        assert_eq!(fetched, 0);
    }

    struct CountingMock {
        pdus: HashMap<String, Value>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl EventFetcher for CountingMock {
        async fn fetch_event(&self, _destination: &str, event_id: &str) -> std::result::Result<Value, FedError> {
            self.calls.lock().unwrap().push(event_id.to_owned());
            self.pdus.get(event_id).cloned().ok_or_else(|| FedError::NotFound(event_id.to_owned()))
        }
    }

    /// Builds a 3-deep ancestor chain the receiving server has never seen,
    /// each referencing the one before, and exercises the fetch side of
    /// backfill (not the kernel's admission, which needs real signature
    /// verification and is covered separately): the walk reaches all three
    /// ancestors and fetches each exactly once.
    #[tokio::test]
    async fn backfill_fetches_each_unknown_ancestor_exactly_once() {
        let hs = Homeserver::ephemeral("origin.example").unwrap();
        let alice = UserId::new_unchecked("@alice:origin.example");
        let (room_id, _) = hs.create_room(&alice).unwrap();

        let mut depth = 4i64;
        let mut prev = hs.store().heads(&room_id);
        let mut pdus = HashMap::new();
        let mut chain_ids = Vec::new();
        for _ in 0..3 {
            depth += 1;
            let event_id = EventId::from_parts(&format!("anc{depth}"), "origin.example");
            let pdu = json!({
                "event_id": event_id.as_str(),
                "room_id": room_id.as_str(),
                "sender": alice.as_str(),
                "origin": "origin.example",
                "type": "m.room.message",
                "depth": depth,
                "prev_events": prev.iter().map(|id| json!([id.as_str(), {}])).collect::<Vec<_>>(),
                "content": {"msgtype": "m.text", "body": "hi"},
            });
            pdus.insert(event_id.as_str().to_owned(), pdu);
            chain_ids.push(event_id.clone());
            prev = vec![event_id];
        }
        let leaf_id = chain_ids.last().unwrap().clone();

        let mock = CountingMock { pdus, calls: Mutex::new(Vec::new()) };
        let fetcher = AncestorFetcher::new(&mock);
        // admitting the chain fails: these hand-built pdus carry no real
        // content hash, so HASH rejects the first one. The fetch walk still
        // runs to completion first, which is what this test is after.
        let result = hs.backfill_ancestors(&fetcher, "origin.example", &room_id, &leaf_id).await;
        assert!(result.is_err());

        let calls = mock.calls.lock().unwrap().clone();
        let unique: HashSet<_> = calls.iter().collect();
        assert_eq!(unique.len(), 3, "all three ancestors were reached");
        assert_eq!(calls.len(), 3, "none was fetched twice");
    }
}
