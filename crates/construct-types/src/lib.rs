//! Core identifier and value types shared across the Construct crates.
//!
//! This crate contains the small, `Copy`-friendly or cheaply-cloned types
//! that flow through every layer of the homeserver:
//! - Matrix identifiers ([`EventId`], [`RoomId`], [`UserId`], [`Host`])
//! - The process-local event key ([`EventIdx`])
//! - Room depth ([`Depth`]) and wall-clock timestamps ([`Timestamp`])
//! - The closed conformance/error vocabulary shared by every layer
//!   ([`ConformFlag`])

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Matrix identifiers
// ============================================================================

/// Error returned when a string does not have the shape `<sigil><local>:<host>`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier {0:?} is missing its ':' host separator")]
    MissingHostSeparator(String),
    #[error("identifier {0:?} does not start with sigil {1:?}")]
    WrongSigil(String, char),
    #[error("identifier {0:?} has an empty host")]
    EmptyHost(String),
}

/// Splits `<sigil><local>:<host>` into `(local, host)`, validating the sigil.
fn split_mxid(s: &str, sigil: char) -> Result<(String, String), IdError> {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == sigil => {}
        _ => return Err(IdError::WrongSigil(s.to_owned(), sigil)),
    }
    let rest = chars.as_str();
    let colon = rest
        .find(':')
        .ok_or_else(|| IdError::MissingHostSeparator(s.to_owned()))?;
    let (local, host) = rest.split_at(colon);
    let host = &host[1..];
    if host.is_empty() {
        return Err(IdError::EmptyHost(s.to_owned()));
    }
    Ok((local.to_owned(), host.to_owned()))
}

macro_rules! mxid_type {
    ($name:ident, $sigil:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Sigil prefixing this identifier kind (`$`, `!`, `@`, ...).
            pub const SIGIL: char = $sigil;

            /// Wraps a full identifier string without validating its shape.
            ///
            /// Used by conformance (§4.4) to carry forward malformed ids so
            /// the failing bit can be reported against the original bytes.
            pub fn new_unchecked(full: impl Into<String>) -> Self {
                Self(full.into())
            }

            /// Parses and validates `<sigil><local>:<host>`.
            pub fn parse(full: &str) -> Result<Self, IdError> {
                split_mxid(full, Self::SIGIL)?;
                Ok(Self(full.to_owned()))
            }

            /// Builds an identifier from an explicit local part and host.
            pub fn from_parts(local: &str, host: &str) -> Self {
                Self(format!("{}{}:{}", Self::SIGIL, local, host))
            }

            /// The full identifier string, sigil included.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The host suffix, i.e. everything after the last unescaped `:`.
            ///
            /// Returns `""` if the identifier does not conform (no `:`).
            pub fn host(&self) -> &str {
                match self.0.find(':') {
                    Some(i) => &self.0[i + 1..],
                    None => "",
                }
            }

            /// The local part, sigil and host stripped.
            ///
            /// Returns the identifier minus its sigil if malformed.
            pub fn local_part(&self) -> &str {
                let without_sigil = self.0.strip_prefix(Self::SIGIL).unwrap_or(&self.0);
                match without_sigil.find(':') {
                    Some(i) => &without_sigil[..i],
                    None => without_sigil,
                }
            }

            /// True if `self.host()` equals `host`, case-sensitively.
            ///
            /// Conformance (§4.4) compares `event_id.host == origin` and
            /// `sender.host == origin` with exactly this check.
            pub fn host_is(&self, host: &str) -> bool {
                self.host() == host
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

mxid_type!(EventId, '$', "A Matrix event id: `$<opaque>:<host>`.");
mxid_type!(RoomId, '!', "A Matrix room id: `!<opaque>:<host>`.");
mxid_type!(UserId, '@', "A Matrix user id: `@<localpart>:<host>`.");

/// A bare hostname, as used for `origin` and federation peer addressing.
///
/// Distinct from the `host()` suffix of an [`EventId`]/[`RoomId`]/[`UserId`]
/// so that a server's own name can be compared against either without an
/// intermediate allocation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host(String);

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Host {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Host {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<str> for Host {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

// ============================================================================
// Event idx: the authoritative, process-local event key
// ============================================================================

/// A monotonic 64-bit integer assigned to an event at commit time.
///
/// Every cross-reference inside the store (`room_events`, `room_state`,
/// `event_bad`) uses `EventIdx` rather than repeating the `event_id` string,
/// per §3 "Event index".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventIdx(u64);

impl EventIdx {
    /// The sentinel used for "no event", e.g. a room with no head yet.
    pub const NONE: EventIdx = EventIdx(0);

    pub fn new(v: u64) -> Self {
        Self(v)
    }

    /// Big-endian bytes, the on-disk column-key encoding (§4.6).
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// The next idx in commit order.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for EventIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventIdx {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<EventIdx> for u64 {
    fn from(idx: EventIdx) -> Self {
        idx.0
    }
}

// ============================================================================
// Depth
// ============================================================================

/// An event's depth: `0` for `m.room.create`, otherwise `max(prev depths) + 1`.
///
/// Stored as a signed integer even though valid depths are non-negative:
/// conformance (§4.4) must be able to represent and flag a *negative* depth
/// read off the wire (`DEPTH_NEGATIVE`) before rejecting it, so the type
/// cannot simply refuse to hold one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Depth(i64);

impl Depth {
    pub const ZERO: Depth = Depth(0);

    pub fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `max(self, other) + 1`, saturating. Used by ACCESS (§4.7 phase 3).
    pub fn child_of(parents: impl IntoIterator<Item = Depth>) -> Depth {
        let max = parents.into_iter().map(|d| d.0).max().unwrap_or(-1);
        Depth(max.saturating_add(1))
    }

    /// Big-endian encoding for `room_events` ordered keys (§4.6).
    ///
    /// XORs the sign bit so the big-endian byte order of negative and
    /// non-negative depths still matches signed numeric order.
    pub fn to_be_bytes(self) -> [u8; 8] {
        ((self.0 as u64) ^ (1 << 63)).to_be_bytes()
    }
}

impl Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Timestamp
// ============================================================================

/// Milliseconds since the Unix epoch, as carried in `origin_server_ts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn now() -> Self {
        let dur = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self(dur.as_millis() as u64)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Conformance flags (§4.4)
// ============================================================================

/// One failure bit from the closed conformance enumeration (§4.4).
///
/// A closed `enum` rather than a bitflags integer: conformance never needs
/// to serialize the mask across a wire boundary, only report it to logs and
/// tests, so a `Vec<ConformFlag>` (deduplicated, insertion-ordered) is the
/// simplest faithful representation of "a bitset of failures chosen from a
/// closed enumeration".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConformFlag {
    InvalidOrMissingEventId,
    InvalidOrMissingRoomId,
    InvalidOrMissingSenderId,
    InvalidOrMissingRedactsId,
    MissingType,
    MissingOrigin,
    MissingMembership,
    InvalidMembership,
    MissingContentMembership,
    InvalidContentMembership,
    MissingPrevEvents,
    MissingPrevState,
    DepthNegative,
    DepthZero,
    MissingSignatures,
    MissingOriginSignature,
    MismatchOriginSender,
    MismatchOriginEventId,
    SelfRedacts,
    SelfPrevEvent,
    SelfPrevState,
    DupPrevEvent,
    DupPrevState,
}

impl Display for ConformFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_round_trips_through_parts() {
        let id = EventId::from_parts("abc123", "matrix.example.org");
        assert_eq!(id.as_str(), "$abc123:matrix.example.org");
        assert_eq!(id.host(), "matrix.example.org");
        assert_eq!(id.local_part(), "abc123");
    }

    #[test]
    fn parse_rejects_wrong_sigil() {
        assert!(matches!(
            EventId::parse("!oops:example.org"),
            Err(IdError::WrongSigil(_, '$'))
        ));
    }

    #[test]
    fn parse_rejects_missing_host() {
        assert!(matches!(
            RoomId::parse("!noHostHere"),
            Err(IdError::MissingHostSeparator(_))
        ));
    }

    #[test]
    fn host_is_matches_case_sensitively() {
        let id = UserId::from_parts("alice", "self");
        assert!(id.host_is("self"));
        assert!(!id.host_is("Self"));
    }

    #[test]
    fn depth_child_of_takes_max_plus_one() {
        let d = Depth::child_of([Depth::new(3), Depth::new(7), Depth::new(2)]);
        assert_eq!(d.get(), 8);
    }

    #[test]
    fn depth_child_of_empty_is_zero() {
        assert_eq!(Depth::child_of([]).get(), 0);
    }

    #[test]
    fn event_idx_be_bytes_preserve_order() {
        let a = EventIdx::new(1).to_be_bytes();
        let b = EventIdx::new(2).to_be_bytes();
        assert!(a < b);
    }
}
