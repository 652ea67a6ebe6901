//! Homeserver error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HomeserverError>;

#[derive(Debug, Error)]
pub enum HomeserverError {
    #[error("event rejected by the kernel: {0}")]
    Kernel(#[from] construct_kernel::KernelError),

    #[error("store error: {0}")]
    Store(#[from] construct_store::StoreError),

    #[error("federation error: {0}")]
    Federation(#[from] construct_federation::FedError),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("event {0} not found")]
    EventNotFound(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl From<HomeserverError> for construct_federation::FedError {
    fn from(err: HomeserverError) -> Self {
        match err {
            HomeserverError::Kernel(k) => k.into(),
            HomeserverError::Federation(f) => f,
            HomeserverError::RoomNotFound(_) | HomeserverError::EventNotFound(_) => {
                construct_federation::FedError::NotFound(err.to_string())
            }
            HomeserverError::Malformed(_) => construct_federation::FedError::Conform,
            HomeserverError::Store(_) | HomeserverError::Io(_) => {
                construct_federation::FedError::Internal(err.to_string())
            }
        }
    }
}
