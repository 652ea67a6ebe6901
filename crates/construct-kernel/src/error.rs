use construct_types::{ConformFlag, EventId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("event has no m.room.create in its room and none was seen yet")]
    NoCreateEvent,
    #[error("membership event content.membership is missing or unrecognized")]
    InvalidMembership,
    #[error("sender {0} is not currently joined to the room")]
    SenderNotInRoom(String),
    #[error("sender {0}'s power level {1} is below the required {2} for {3}")]
    InsufficientPowerLevel(String, i64, i64, &'static str),
    #[error("event references auth_events that do not authorize it")]
    MissingAuthEvent,
    #[error("room_id host does not match the create event's origin")]
    RoomIdHostMismatch,
    #[error("second m.room.create event in an existing room")]
    DuplicateCreate,
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("event failed conformance: {0:?}")]
    Conform(Vec<ConformFlag>),
    #[error("event {0} was already written")]
    AlreadySeen(EventId),
    #[error("hash verification failed for {0}")]
    BadHash(EventId),
    #[error("signature verification failed for {0}")]
    BadSignature(EventId),
    #[error("auth rejected: {0}")]
    Auth(#[from] AuthError),
    #[error("canonicalization failed")]
    Canon(#[from] construct_crypto::CanonError),
}
