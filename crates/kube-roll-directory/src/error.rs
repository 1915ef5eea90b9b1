//! Error types for the pod directory crate.

use thiserror::Error;

/// Errors returned by a [`PodDirectory`](crate::PodDirectory).
///
/// A missing pod is never an error here: deletion reports
/// [`DeleteOutcome::AlreadyGone`](crate::DeleteOutcome::AlreadyGone) and lookups
/// return `None`.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// The API server could not be reached or the connection broke.
    #[error("transport error: {0}")]
    Transport(String),

    /// The API server answered with an error status.
    #[error("Kubernetes API error {code} ({reason}): {message}")]
    Api {
        /// HTTP status code.
        code: u16,
        /// Machine-readable reason, e.g. `ServiceUnavailable`.
        reason: String,
        /// Human-readable message from the server.
        message: String,
    },

    /// Credentials were rejected or are not allowed to perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request was rejected as malformed, e.g. a bad label selector.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client could not be configured.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other client-side failure.
    #[error("Kubernetes client error: {0}")]
    Client(String),
}

impl DirectoryError {
    /// Classify an API error status into a directory error.
    #[must_use]
    pub fn from_status(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            401 | 403 => Self::Unauthorized(message),
            400 | 422 => Self::InvalidRequest(message),
            _ => Self::Api {
                code,
                reason: reason.into(),
                message,
            },
        }
    }

    /// Check if this error is transient and the call may be retried.
    ///
    /// Throttling (429) and server-side (5xx) statuses are transient along with
    /// transport failures. Everything else is permanent.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            Self::Unauthorized(_) | Self::InvalidRequest(_) | Self::Config(_) | Self::Client(_) => {
                false
            }
        }
    }
}

impl From<kube::Error> for DirectoryError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Self::from_status(resp.code, resp.reason, resp.message),
            kube::Error::HyperError(e) => Self::Transport(e.to_string()),
            kube::Error::Service(e) => Self::Transport(e.to_string()),
            kube::Error::Auth(e) => Self::Unauthorized(e.to_string()),
            other => Self::Client(other.to_string()),
        }
    }
}

/// A specialized Result type for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;
