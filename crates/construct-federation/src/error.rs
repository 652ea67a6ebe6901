//! The closed error taxonomy (§7) and its mapping onto HTTP status codes.

use thiserror::Error;

/// Result type for federation client and server operations.
pub type FedResult<T> = Result<T, FedError>;

#[derive(Debug, Error)]
pub enum FedError {
    #[error("event failed conformance")]
    Conform,
    #[error("event failed auth rules")]
    AuthFail,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("signature verification failed")]
    Inauthentic,
    #[error("operation exceeded its deadline")]
    Timeout,
    #[error("transport failure: {0}")]
    Network(String),
    #[error("malformed wire input: {0}")]
    Protocol(String),
    #[error("overload: {0}")]
    Overload(String),
    #[error("task cancelled")]
    Cancelled,
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl FedError {
    /// The response status a resource handler should send for this error.
    pub fn status(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Self::Conform | Self::AuthFail | Self::Inauthentic | Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Overload(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `true` if the federation client should retry this with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

impl From<construct_kernel::KernelError> for FedError {
    fn from(err: construct_kernel::KernelError) -> Self {
        use construct_kernel::KernelError;
        match err {
            KernelError::Conform(_) => Self::Conform,
            KernelError::AlreadySeen(_) => Self::Internal("event already committed".into()),
            KernelError::BadHash(_) | KernelError::BadSignature(_) => Self::Inauthentic,
            KernelError::Auth(_) => Self::AuthFail,
            KernelError::Canon(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for FedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_the_only_retryable_kinds() {
        assert!(FedError::Network("reset".into()).is_retryable());
        assert!(FedError::Timeout.is_retryable());
        assert!(!FedError::Protocol("bad json".into()).is_retryable());
        assert!(!FedError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn status_mapping_matches_the_taxonomy() {
        assert_eq!(FedError::Conform.status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(FedError::NotFound("x".into()).status(), http::StatusCode::NOT_FOUND);
        assert_eq!(FedError::Network("x".into()).status(), http::StatusCode::BAD_GATEWAY);
        assert_eq!(FedError::Overload("x".into()).status(), http::StatusCode::PAYLOAD_TOO_LARGE);
    }
}
