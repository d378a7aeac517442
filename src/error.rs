//! Error types shared by every client operation.

use thiserror::Error;

/// Classification of a [`ClientError`].
///
/// Callers should dispatch on the kind rather than on the variant, since
/// several variants collapse into the same kind depending on HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or unusable client configuration (e.g. no API key).
    Configuration,
    /// The caller supplied a request that cannot be sent.
    InvalidRequest,
    /// Connection-level failure before a response was received.
    Transport,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerFault,
    /// HTTP 4xx other than 429.
    ClientFault,
    /// Cancelled by the caller or by the internal timeout.
    Aborted,
    /// The provider answered with a body that could not be decoded.
    InvalidResponse,
}

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("Request aborted: {0}")]
    Aborted(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Build an error for a non-2xx provider response.
    pub fn api(status: u16, message: impl Into<String>, code: Option<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            code,
        }
    }

    /// Error raised when a cancellation signal or timeout fires.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Api { status: 429, .. } => ErrorKind::RateLimited,
            Self::Api { status, .. } if *status >= 500 => ErrorKind::ServerFault,
            Self::Api { .. } => ErrorKind::ClientFault,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }

    /// Human readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Configuration(m)
            | Self::InvalidRequest(m)
            | Self::Transport(m)
            | Self::Aborted(m)
            | Self::InvalidResponse(m) => m,
            Self::Api { message, .. } => message,
        }
    }

    /// HTTP status of the failed response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Provider error code from the `{"error": {"code": ..}}` envelope.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the retry engine may attempt the operation again.
    ///
    /// Cancellation is never retryable, whatever else is true of the error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::RateLimited | ErrorKind::ServerFault
        )
    }

    pub fn is_aborted(&self) -> bool {
        self.kind() == ErrorKind::Aborted
    }
}

/// Bodies are read as raw bytes and decoded with serde_json, so a reqwest
/// error is a connection-level failure unless it carries a status. reqwest
/// flags interrupted body reads as `is_decode`; those are transport faults.
impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::api(status.as_u16(), err.to_string(), None);
        }
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
