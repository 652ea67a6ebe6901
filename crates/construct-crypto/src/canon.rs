//! Canonical JSON (§4.3).
//!
//! Same rules Matrix uses: object keys lexically sorted at every nesting
//! level, no insignificant whitespace, integers in shortest decimal form,
//! UTF-8 strings with the usual JSON escapes, no trailing members. We get
//! this for free from [`serde_json::Value`]: its `Map` is a `BTreeMap`
//! (the `preserve_order` feature is deliberately *not* enabled anywhere in
//! this workspace), so re-serializing a `Value` always emits its members in
//! sorted order, and `serde_json`'s compact writer never emits whitespace.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("value is not a JSON object")]
    NotAnObject,
    #[error("slab of {slab_len} bytes is too small for {needed} canonical bytes")]
    SlabTooSmall { slab_len: usize, needed: usize },
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Serializes `value` to its canonical byte form.
///
/// Because `Value::Object` is backed by a `BTreeMap`, this is already a
/// fixed point: `canonicalize(&from_str(&canonicalize(v)).unwrap()) ==
/// canonicalize(v)` for any `v` (§8 property 1).
pub fn canonicalize(value: &Value) -> String {
    // `to_string` never emits insignificant whitespace; `Value`'s object
    // map keeps keys sorted, satisfying both canonical-JSON requirements
    // without a bespoke writer.
    serde_json::to_string(value).expect("Value serialization is infallible")
}

/// Serializes `value` into a caller-provided slab, returning the filled
/// prefix.
///
/// Mirrors the teacher's buffer convention (§4.2/§4.3): the serializer never
/// allocates its own scratch space, callers own the lifetime of the bytes.
pub fn canonicalize_into<'a>(value: &Value, slab: &'a mut [u8]) -> Result<&'a [u8], CanonError> {
    let mut cursor: &mut [u8] = slab;
    let before = cursor.len();
    serde_json::to_writer(&mut cursor, value)?;
    let written = before - cursor.len();
    Ok(&slab[..written])
}

/// Returns `value` with `hashes` and `signatures` set to empty objects.
///
/// This is the `E'` used for the event hash (§4.3): the hash covers the
/// event with both fields blanked, never omitted, so the member still
/// participates in key-sort but contributes no content.
pub fn blank_hashes_and_signatures(value: &Value) -> Result<Value, CanonError> {
    let mut obj = value.as_object().ok_or(CanonError::NotAnObject)?.clone();
    obj.insert("hashes".to_owned(), Value::Object(Default::default()));
    obj.insert("signatures".to_owned(), Value::Object(Default::default()));
    Ok(Value::Object(obj))
}

/// Returns `value` with only `signatures` blanked, `hashes` left intact.
///
/// This is `E''`, the form signatures are computed and verified over
/// (§4.3): the event's own content hash must be covered by the signature,
/// but the signature map obviously cannot cover itself.
pub fn blank_signatures(value: &Value) -> Result<Value, CanonError> {
    let mut obj = value.as_object().ok_or(CanonError::NotAnObject)?.clone();
    obj.insert("signatures".to_owned(), Value::Object(Default::default()));
    Ok(Value::Object(obj))
}
