//! The Matrix event tuple, conformance, and redaction (§3, §4.4).

pub mod conform;
pub mod derive;
pub mod essential;
pub mod event;

pub use conform::{ConformOpts, check, conform_flags, fatal_flags};
pub use derive::{
    compute_event_hash, derive_event_id, sign_event, signing_content, verify_event_hash,
    verify_event_signature,
};
pub use essential::essential;
pub use event::{Event, PrevRef};
