//! The wire-level error taxonomy a handler failure is reduced to.

use serde::{Deserialize, Serialize};

/// Error kinds a client can observe, one per `ERROR~<kind>` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    AuthRequired,
    AuthFailed,
    NotFound,
    PermissionDenied,
    BadInput,
    StorageFailure,
    TransportFailure,
    CryptoFailure,
}

impl ErrorCode {
    /// The token sent after `ERROR~` on the wire.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::AuthRequired => "NOT LOGGED IN",
            Self::AuthFailed => "AUTH FAILED",
            Self::NotFound => "NOT FOUND",
            Self::PermissionDenied => "PERMISSION DENIED",
            Self::BadInput => "BAD INPUT",
            Self::StorageFailure => "STORAGE FAILURE",
            Self::TransportFailure => "TRANSPORT FAILURE",
            Self::CryptoFailure => "CRYPTO FAILURE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire_str())
    }
}
