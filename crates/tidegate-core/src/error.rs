//! Shared error type across tidegate crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed message.
    BadRequest,
    /// Unknown command, route or socket event.
    NotFound,
    /// A request that must be serialized is already in flight.
    Conflict,
    /// The backend did not answer in time.
    Timeout,
    /// The backend link is closed or saturated.
    BackendUnavailable,
    /// Unsupported config/protocol version.
    UnsupportedVersion,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON responses and socket error events.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::NotFound => "NOT_FOUND",
            ClientCode::Conflict => "CONFLICT",
            ClientCode::Timeout => "TIMEOUT",
            ClientCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ClientCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, TideError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum TideError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend did not reply to {msg_type} within {timeout_ms}ms")]
    Timeout { msg_type: String, timeout_ms: u64 },
    #[error("backend connection closed")]
    ConnectionClosed,
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl TideError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            TideError::BadRequest(_) | TideError::Decode(_) => ClientCode::BadRequest,
            TideError::NotFound(_) => ClientCode::NotFound,
            TideError::Conflict(_) => ClientCode::Conflict,
            TideError::Timeout { .. } => ClientCode::Timeout,
            TideError::ConnectionClosed | TideError::BackendUnavailable(_) => {
                ClientCode::BackendUnavailable
            }
            TideError::UnsupportedVersion => ClientCode::UnsupportedVersion,
            TideError::Io(_) | TideError::Internal(_) => ClientCode::Internal,
        }
    }

    /// True for the failure a client sees when the backend never answered.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TideError::Timeout { .. })
    }
}
