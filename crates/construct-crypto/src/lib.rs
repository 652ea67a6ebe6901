//! Canonical JSON, hashing and Ed25519 signing primitives (§4.3).
//!
//! This crate has no knowledge of the event schema; `construct-event` is
//! the layer that knows which fields to blank before hashing or signing.

pub mod canon;
pub mod hash;
pub mod sign;

pub use canon::{CanonError, canonicalize, canonicalize_into};
pub use hash::{Sha256Digest, sha256_base58, sha256_base64_unpadded};
pub use sign::{ServerSigningKey, SignError, verify};
