use crate::model::SessionState;

/// Errors produced by the streaming engine.
///
/// Failures that happen after a session is Active are never returned from an
/// async callback; they reach the sink through `RenderSink::on_complete`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Transport could not be established, returned a non-success status, or
    /// dropped before the stream finished.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        status_code: Option<u16>,
    },
    /// An internal invariant was broken (for example a buffer that shrank).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Caller misuse of the session lifecycle.
    #[error("invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },
    /// The request is malformed and was rejected before any I/O.
    #[error("validation error: {0}")]
    Validation(String),
    /// Invalid transport configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl StreamError {
    /// Creates a connection error without an HTTP status.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            status_code: None,
        }
    }

    /// Creates a connection error for a non-success HTTP status.
    pub fn status(status_code: u16, message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Returns the HTTP status when the error came from a rejected request.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Connection { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

/// Errors returned by the local key-value store behind the pinboard.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    /// The stored value could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
