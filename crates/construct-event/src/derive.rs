//! Deriving `event_id`, `hashes.sha256`, and the signed content form
//! (§4.3, §4.4, §8 properties 2–4).

use construct_crypto::{CanonError, ServerSigningKey, SignError};
use construct_types::EventId;
use serde_json::Value;

use crate::essential::essential;
use crate::event::Event;

/// `$` + base58(SHA-256(canonical_json(E \ event_id))) + `:` + `local_host`.
pub fn derive_event_id(event: &Event, local_host: &str) -> EventId {
    let mut v = event.value().clone();
    if let Some(obj) = v.as_object_mut() {
        obj.remove("event_id");
    }
    let canon = construct_crypto::canonicalize(&v);
    let digest = construct_crypto::hash::sha256_base58(canon.as_bytes());
    EventId::from_parts(&digest, local_host)
}

/// base64-unpadded SHA-256 over `E'` (hashes and signatures blanked).
pub fn compute_event_hash(event: &Event) -> Result<String, CanonError> {
    let blanked = construct_crypto::canon::blank_hashes_and_signatures(event.value())?;
    let canon = construct_crypto::canonicalize(&blanked);
    Ok(construct_crypto::sha256_base64_unpadded(canon.as_bytes()))
}

/// `true` iff the stored `hashes.sha256` matches a freshly computed one.
pub fn verify_event_hash(event: &Event) -> bool {
    match compute_event_hash(event) {
        Ok(computed) => event.hashes().get("sha256") == Some(&computed),
        Err(_) => false,
    }
}

/// The exact bytes a signature is computed/verified over: canonical JSON of
/// `essential(E)` with `signatures` blanked (`E''`).
pub fn signing_content(event: &Event) -> Result<Value, CanonError> {
    let reduced = essential(event);
    construct_crypto::canon::blank_signatures(reduced.value())
}

/// Signs `event` with `key`, merging the signature under `host`.
pub fn sign_event(
    event: &mut Event,
    key: &ServerSigningKey,
    host: &str,
) -> Result<(), CanonError> {
    let signing_value = signing_content(event)?;
    let canon = construct_crypto::canonicalize(&signing_value);
    let signature = key.sign(canon.as_bytes());
    event.merge_signature(host, key.keyid(), &signature);
    Ok(())
}

/// Verifies the `(host, keyid)` signature in `event.signatures()` against
/// `public_key_base64`.
pub fn verify_event_signature(
    event: &Event,
    host: &str,
    keyid: &str,
    public_key_base64: &str,
) -> Result<(), SignError> {
    let signing_value = signing_content(event).map_err(|_| SignError::Inauthentic)?;
    let canon = construct_crypto::canonicalize(&signing_value);
    let signatures = event.signatures();
    let signature = signatures
        .get(host)
        .and_then(|by_keyid| by_keyid.get(keyid))
        .ok_or(SignError::Inauthentic)?;
    construct_crypto::verify(canon.as_bytes(), signature, public_key_base64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_id_is_derived_deterministically() {
        let e = Event::from_value(json!({"type": "m.room.create", "depth": 0}));
        let a = derive_event_id(&e, "self");
        let b = derive_event_id(&e, "self");
        assert_eq!(a, b);
        assert_eq!(a.host(), "self");
    }

    #[test]
    fn derivation_ignores_any_existing_event_id() {
        let e1 = Event::from_value(json!({"type": "m.room.create", "depth": 0}));
        let mut v = e1.value().clone();
        v["event_id"] = json!("$something-else:self");
        let e2 = Event::from_value(v);
        assert_eq!(derive_event_id(&e1, "self"), derive_event_id(&e2, "self"));
    }

    #[test]
    fn hash_round_trips() {
        let mut e = Event::from_value(json!({"type": "m.room.create", "depth": 0}));
        let h = compute_event_hash(&e).unwrap();
        e.set_hashes(&[("sha256".to_owned(), h)].into_iter().collect());
        assert!(verify_event_hash(&e));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let key = ServerSigningKey::generate("ed25519:1");
        let mut e = Event::from_value(json!({"type": "m.room.message", "content": {"body": "hi"}}));
        sign_event(&mut e, &key, "self").unwrap();
        verify_event_signature(&e, "self", "ed25519:1", &key.public_key_base64()).unwrap();
    }

    #[test]
    fn modifying_essential_content_breaks_verification() {
        let key = ServerSigningKey::generate("ed25519:1");
        let mut e = Event::from_value(
            json!({"type": "m.room.member", "content": {"membership": "join"}}),
        );
        sign_event(&mut e, &key, "self").unwrap();
        let mut v = e.into_value();
        v["content"]["membership"] = json!("leave");
        let tampered = Event::from_value(v);
        assert!(
            verify_event_signature(&tampered, "self", "ed25519:1", &key.public_key_base64())
                .is_err()
        );
    }
}
