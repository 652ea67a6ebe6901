use construct_types::EventId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    #[error("event {0} is not present in the store")]
    NotFound(EventId),
    #[error("corrupted record: checksum mismatch")]
    CorruptRecord,
    #[error("corrupted record: unexpected end of file")]
    TruncatedRecord,
    #[error("event serialization failed")]
    Serialization(#[from] serde_json::Error),
}
