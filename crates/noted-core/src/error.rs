//! Error types for the server's core.

use noted_proto::ErrorCode;
use thiserror::Error;

/// Errors that can occur while handling a connection, a document
/// change, or a Store call.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("not logged in")]
    AuthRequired,

    #[error("authentication failed")]
    AuthFailed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("transport failure: {0}")]
    TransportFailure(#[from] std::io::Error),

    #[error("crypto failure: {0}")]
    CryptoFailure(String),
}

impl From<rsa::Error> for ServerError {
    fn from(err: rsa::Error) -> Self {
        Self::CryptoFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadInput(err.to_string())
    }
}

impl From<&ServerError> for ErrorCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::AuthRequired => ErrorCode::AuthRequired,
            ServerError::AuthFailed => ErrorCode::AuthFailed,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            ServerError::BadInput(_) => ErrorCode::BadInput,
            ServerError::StorageFailure(_) => ErrorCode::StorageFailure,
            ServerError::TransportFailure(_) => ErrorCode::TransportFailure,
            ServerError::CryptoFailure(_) => ErrorCode::CryptoFailure,
        }
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
